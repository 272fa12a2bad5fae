//! Region name to region handle resolution
//!
//! Lookups are answered from an append-only cache when possible. On a miss the peer is asked
//! once per name: further lookups for the same name queue behind the in-flight query. Each
//! in-flight query has a deadline, after which its waiters are completed with a timeout and the
//! entry is forgotten so that the next lookup asks again.
//!
//! The resolver is sans-IO with respect to time: callers pass `now` in and drive expiry through
//! [`poll_timeout`](DestinationResolver::poll_timeout) and
//! [`handle_timeout`](DestinationResolver::handle_timeout).

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::{
    config::NameMatch, peer::Peer, ConnectionHandle, RegionHandle, RegionKey, ResolveError,
};

/// Result of a [`DestinationResolver::resolve`] call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The handle was cached; the caller has already been completed
    Ready(RegionHandle),
    /// The caller was queued behind a query and will be completed later
    Pending,
    /// There is no live peer; nothing was queued and nothing was asked
    NotConnected,
}

/// A waiter completed by the resolver, along with the result it is owed
pub type Completion<W> = (W, Result<RegionHandle, ResolveError>);

/// One unresolved name and everyone waiting on it
#[derive(Debug)]
struct PendingWaiter<W> {
    /// Name as given by the first caller
    key: RegionKey,
    /// Connection the query was sent on
    issued_on: ConnectionHandle,
    deadline: Instant,
    waiters: Vec<W>,
}

#[derive(Debug)]
struct CacheEntry {
    /// Spelling returned by the peer
    canonical: String,
    handle: RegionHandle,
}

/// Counters describing resolver activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Lookups answered from the cache
    pub cache_hits: u64,
    /// Queries sent to a peer
    pub queries_issued: u64,
    /// Lookups attached to a query already in flight
    pub deduplicated: u64,
    /// In-flight queries abandoned at their deadline
    pub timeouts: u64,
    /// Distinct regions cached
    pub cached_regions: usize,
    /// Queries currently in flight
    pub pending: usize,
}

/// Cache and in-flight query table, generic over what a waiter is
///
/// The cache never evicts; its size is bounded by the number of distinct region names the
/// peer has confirmed.
#[derive(Debug)]
pub struct DestinationResolver<W> {
    name_match: NameMatch,
    timeout: Duration,
    cache: FxHashMap<String, CacheEntry>,
    in_flight: FxHashMap<String, PendingWaiter<W>>,
    cache_hits: u64,
    queries_issued: u64,
    deduplicated: u64,
    timeouts: u64,
}

impl<W> DestinationResolver<W> {
    /// Create an empty resolver
    pub fn new(name_match: NameMatch, timeout: Duration) -> Self {
        Self {
            name_match,
            timeout,
            cache: FxHashMap::default(),
            in_flight: FxHashMap::default(),
            cache_hits: 0,
            queries_issued: 0,
            deduplicated: 0,
            timeouts: 0,
        }
    }

    /// Look `key` up, completing or queueing `waiter`
    ///
    /// On a cache hit the waiter is returned with its result for the caller to complete
    /// synchronously. `peer` is the current connection; if it is missing or not connected the
    /// lookup fails without touching the cache or asking anyone, and the waiter is handed back
    /// uncompleted.
    pub fn resolve(
        &mut self,
        key: &RegionKey,
        peer: Option<&dyn Peer>,
        now: Instant,
        waiter: W,
    ) -> (ResolveOutcome, Option<Completion<W>>) {
        let Some(peer) = peer.filter(|peer| peer.is_connected()) else {
            debug!(region = %key, "lookup without a live connection");
            return (ResolveOutcome::NotConnected, None);
        };

        let norm = self.name_match.normalize(key.as_str());
        if let Some(entry) = self.cache.get(&norm) {
            self.cache_hits += 1;
            trace!(region = %key, handle = %entry.handle, "cache hit");
            return (
                ResolveOutcome::Ready(entry.handle),
                Some((waiter, Ok(entry.handle))),
            );
        }

        if let Some(pending) = self.in_flight.get_mut(&norm) {
            self.deduplicated += 1;
            pending.waiters.push(waiter);
            trace!(region = %key, waiters = pending.waiters.len(), "joined query in flight");
            return (ResolveOutcome::Pending, None);
        }

        let issued_on = peer.handle();
        debug!(region = %key, %issued_on, "querying region");
        self.queries_issued += 1;
        self.in_flight.insert(
            norm,
            PendingWaiter {
                key: key.clone(),
                issued_on,
                deadline: now + self.timeout,
                waiters: vec![waiter],
            },
        );
        peer.request_region(key.as_str());
        (ResolveOutcome::Pending, None)
    }

    /// Record a confirmed answer from the peer
    ///
    /// The handle is cached even if nobody is waiting for it any more. Every waiter queued on
    /// the name is returned, in arrival order, for completion.
    pub fn region_found(&mut self, name: &str, handle: RegionHandle) -> Vec<Completion<W>> {
        let norm = self.name_match.normalize(name);
        match self.cache.get(&norm) {
            Some(entry) if entry.handle != handle => {
                warn!(region = name, old = %entry.handle, new = %handle, "region handle changed");
            }
            _ => {}
        }
        self.cache.insert(
            norm.clone(),
            CacheEntry {
                canonical: name.to_owned(),
                handle,
            },
        );
        match self.in_flight.remove(&norm) {
            Some(pending) => {
                debug!(region = name, %handle, waiters = pending.waiters.len(), "region resolved");
                pending
                    .waiters
                    .into_iter()
                    .map(|w| (w, Ok(handle)))
                    .collect()
            }
            None => {
                debug!(region = name, %handle, "cached unsolicited answer");
                Vec::new()
            }
        }
    }

    /// Record a negative answer from the peer
    pub fn region_not_found(&mut self, name: &str) -> Vec<Completion<W>> {
        let norm = self.name_match.normalize(name);
        let Some(pending) = self.in_flight.remove(&norm) else {
            trace!(region = name, "negative answer for nothing in flight");
            return Vec::new();
        };
        debug!(region = name, "region does not exist");
        let region = pending.key;
        pending
            .waiters
            .into_iter()
            .map(|w| {
                let err = ResolveError::RegionNotFound {
                    region: region.clone(),
                };
                (w, Err(err))
            })
            .collect()
    }

    /// Abandon every query sent on a connection other than `current`, or on one of `released`
    ///
    /// Such queries can never be answered, since the relay drops the old connection's events.
    /// `released` matters when a reconnect reuses the handle of the session it replaces.
    pub fn abandon_stale(
        &mut self,
        current: Option<ConnectionHandle>,
        released: &[ConnectionHandle],
    ) -> Vec<Completion<W>> {
        let stale = self
            .in_flight
            .iter()
            .filter(|(_, pending)| {
                Some(pending.issued_on) != current || released.contains(&pending.issued_on)
            })
            .map(|(norm, _)| norm.clone())
            .collect::<Vec<_>>();
        let mut completions = Vec::new();
        for norm in stale {
            if let Some(pending) = self.in_flight.remove(&norm) {
                debug!(region = %pending.key, issued_on = %pending.issued_on, "abandoning query");
                completions.extend(
                    pending
                        .waiters
                        .into_iter()
                        .map(|w| (w, Err(ResolveError::NotConnected))),
                );
            }
        }
        completions
    }

    /// Earliest deadline among queries in flight
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.in_flight.values().map(|p| p.deadline).min()
    }

    /// Expire every query whose deadline is at or before `now`
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Completion<W>> {
        let expired = self
            .in_flight
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(norm, _)| norm.clone())
            .collect::<Vec<_>>();
        let mut completions = Vec::new();
        for norm in expired {
            let Some(pending) = self.in_flight.remove(&norm) else {
                continue;
            };
            self.timeouts += 1;
            debug!(region = %pending.key, waiters = pending.waiters.len(), "query timed out");
            let after = self.timeout;
            completions.extend(pending.waiters.into_iter().map(|w| {
                let err = ResolveError::ResolutionTimeout {
                    region: pending.key.clone(),
                    after,
                };
                (w, Err(err))
            }));
        }
        completions
    }

    /// Cached handle for `key`, if any
    pub fn cached(&self, key: &RegionKey) -> Option<RegionHandle> {
        self.cache
            .get(&self.name_match.normalize(key.as_str()))
            .map(|entry| entry.handle)
    }

    /// Canonical spelling of `key` as last reported by the peer
    pub fn canonical_name(&self, key: &RegionKey) -> Option<&str> {
        self.cache
            .get(&self.name_match.normalize(key.as_str()))
            .map(|entry| entry.canonical.as_str())
    }

    /// Whether a query for `key` is in flight
    pub fn is_pending(&self, key: &RegionKey) -> bool {
        self.in_flight
            .contains_key(&self.name_match.normalize(key.as_str()))
    }

    /// Activity counters
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cache_hits: self.cache_hits,
            queries_issued: self.queries_issued,
            deduplicated: self.deduplicated,
            timeouts: self.timeouts,
            cached_regions: self.cache.len(),
            pending: self.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::RecordingPeer;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn resolver() -> DestinationResolver<u32> {
        DestinationResolver::new(NameMatch::CaseInsensitive, TIMEOUT)
    }

    #[test]
    fn concurrent_lookups_share_one_query() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        let now = Instant::now();
        let key = RegionKey::from("Hollywood");
        for waiter in 0..4 {
            let (outcome, done) = resolver.resolve(&key, Some(&*peer), now, waiter);
            assert_eq!(outcome, ResolveOutcome::Pending);
            assert!(done.is_none());
        }
        assert_eq!(peer.queries(), vec!["Hollywood".to_owned()]);

        let handle = RegionHandle::from_grid(1000, 1000);
        let done = resolver.region_found("Hollywood", handle);
        assert_eq!(
            done,
            (0..4).map(|w| (w, Ok(handle))).collect::<Vec<_>>()
        );
        assert!(!resolver.is_pending(&key));
        assert_eq!(resolver.stats().deduplicated, 3);
    }

    #[test]
    fn cached_lookup_completes_synchronously() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        let now = Instant::now();
        let handle = RegionHandle::from_grid(999, 1001);
        resolver.resolve(&"Hollywood".into(), Some(&*peer), now, 0);
        resolver.region_found("Hollywood", handle);

        let (outcome, done) = resolver.resolve(&"hollywood".into(), Some(&*peer), now, 1);
        assert_eq!(outcome, ResolveOutcome::Ready(handle));
        assert_eq!(done, Some((1, Ok(handle))));
        assert_eq!(peer.queries().len(), 1);
        assert_eq!(resolver.canonical_name(&"HOLLYWOOD".into()), Some("Hollywood"));
    }

    #[test]
    fn exact_policy_keeps_differently_cased_names_apart() {
        let mut resolver = DestinationResolver::new(NameMatch::Exact, TIMEOUT);
        let peer = RecordingPeer::connected(1);
        let now = Instant::now();
        resolver.resolve(&"ahern".into(), Some(&*peer), now, 0u32);
        assert!(resolver
            .region_found("Ahern", RegionHandle::from_grid(1, 1))
            .is_empty());
        assert!(resolver.is_pending(&"ahern".into()));
        assert_eq!(resolver.cached(&"Ahern".into()), Some(RegionHandle::from_grid(1, 1)));
    }

    #[test]
    fn not_connected_never_queries() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        peer.set_connected(false);
        let now = Instant::now();
        let (outcome, done) = resolver.resolve(&"Ahern".into(), Some(&*peer), now, 0);
        assert_eq!(outcome, ResolveOutcome::NotConnected);
        assert!(done.is_none());
        let (outcome, _) = resolver.resolve(&"Ahern".into(), None, now, 1);
        assert_eq!(outcome, ResolveOutcome::NotConnected);
        assert!(peer.queries().is_empty());
        assert_eq!(resolver.stats().pending, 0);
    }

    #[test]
    fn timeout_completes_every_waiter_and_forgets_the_query() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        let start = Instant::now();
        resolver.resolve(&"Ahern".into(), Some(&*peer), start, 0);
        resolver.resolve(&"Ahern".into(), Some(&*peer), start + Duration::from_secs(10), 1);
        assert_eq!(resolver.poll_timeout(), Some(start + TIMEOUT));

        assert!(resolver
            .handle_timeout(start + TIMEOUT - Duration::from_millis(1))
            .is_empty());
        let done = resolver.handle_timeout(start + TIMEOUT);
        assert_eq!(done.len(), 2);
        for (_, result) in &done {
            assert!(matches!(result, Err(ResolveError::ResolutionTimeout { .. })));
        }
        assert_eq!(resolver.poll_timeout(), None);

        // A fresh lookup asks again
        resolver.resolve(&"Ahern".into(), Some(&*peer), start + TIMEOUT, 2);
        assert_eq!(peer.queries().len(), 2);
        assert_eq!(resolver.stats().timeouts, 1);
    }

    #[test]
    fn late_answer_still_fills_the_cache() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        let start = Instant::now();
        resolver.resolve(&"Ahern".into(), Some(&*peer), start, 0);
        resolver.handle_timeout(start + TIMEOUT);
        let handle = RegionHandle::from_grid(997, 1002);
        assert!(resolver.region_found("Ahern", handle).is_empty());
        assert_eq!(resolver.cached(&"ahern".into()), Some(handle));
    }

    #[test]
    fn negative_answer_fails_waiters_without_caching() {
        let mut resolver = resolver();
        let peer = RecordingPeer::connected(1);
        let now = Instant::now();
        resolver.resolve(&"Nowhere".into(), Some(&*peer), now, 0);
        let done = resolver.region_not_found("nowhere");
        assert_eq!(
            done,
            vec![(
                0,
                Err(ResolveError::RegionNotFound {
                    region: "Nowhere".into()
                })
            )]
        );
        assert_eq!(resolver.cached(&"Nowhere".into()), None);
    }

    #[test]
    fn queries_on_superseded_connection_are_abandoned() {
        let mut resolver = resolver();
        let old = RecordingPeer::connected(1);
        let new = RecordingPeer::connected(2);
        let now = Instant::now();
        resolver.resolve(&"Ahern".into(), Some(&*old), now, 0);
        resolver.resolve(&"Hollywood".into(), Some(&*new), now, 1);
        let done = resolver.abandon_stale(Some(ConnectionHandle(2)), &[ConnectionHandle(1)]);
        assert_eq!(done, vec![(0, Err(ResolveError::NotConnected))]);
        assert!(resolver.is_pending(&"Hollywood".into()));

        // A reconnect under handle 2 strands what the previous session was asked
        let done = resolver.abandon_stale(Some(ConnectionHandle(2)), &[ConnectionHandle(2)]);
        assert_eq!(done, vec![(1, Err(ResolveError::NotConnected))]);
        assert!(!resolver.is_pending(&"Hollywood".into()));
    }
}
