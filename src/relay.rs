//! Re-dispatch of peer events onto the coordination context
//!
//! Peers raise events on whatever task their network I/O runs on. Each subscribed peer holds an
//! [`EventSink`] that tags events with the peer's [`ConnectionHandle`] and pushes them into one
//! unbounded channel. The coordination context drains that channel and hands every event to
//! [`EventRelay::accept`], which drops anything raised by a peer that is no longer subscribed.
//! Every subscription gets its own id, so a session that reconnects under a handle it used
//! before never has events from its earlier incarnation accepted.
//!
//! Channel order is send order, so events from one peer are seen in the order it raised them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{error::Discard, peer::Peer, ConnectionHandle, PeerEvent};

/// Receiving half of the relay channel, owned by the coordination context
pub type RelayReceiver = mpsc::UnboundedReceiver<RelayedEvent>;

/// A peer event tagged with the connection that raised it
#[derive(Debug)]
pub struct RelayedEvent {
    pub(crate) origin: ConnectionHandle,
    pub(crate) subscription: u64,
    pub(crate) event: PeerEvent,
}

impl RelayedEvent {
    /// Connection that raised the event
    pub fn origin(&self) -> ConnectionHandle {
        self.origin
    }
}

/// Posting end handed to a peer; usable from any thread or task
#[derive(Debug, Clone)]
pub struct EventSink {
    origin: ConnectionHandle,
    subscription: u64,
    live: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<RelayedEvent>,
}

impl EventSink {
    /// Queue `event` for the coordination context
    ///
    /// Never blocks. Returns `false` if the event was dropped because the peer has been
    /// unsubscribed or the coordination context is gone.
    pub fn post(&self, event: PeerEvent) -> bool {
        if !self.live.load(Ordering::Acquire) {
            return false;
        }
        self.tx
            .send(RelayedEvent {
                origin: self.origin,
                subscription: self.subscription,
                event,
            })
            .is_ok()
    }

    /// Whether events posted now can still be delivered
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Connection this sink tags events with
    pub fn origin(&self) -> ConnectionHandle {
        self.origin
    }
}

#[derive(Debug)]
struct Subscription {
    id: u64,
    live: Arc<AtomicBool>,
    peer: Arc<dyn Peer>,
}

/// Counters describing relay traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Events handed to the coordination context
    pub delivered: u64,
    /// Events dropped because their connection had been superseded
    pub stale_discarded: u64,
    /// Peers currently subscribed
    pub subscriptions: usize,
}

/// Subscription table plus the sending half of the relay channel
#[derive(Debug)]
pub struct EventRelay {
    tx: mpsc::UnboundedSender<RelayedEvent>,
    subscriptions: FxHashMap<ConnectionHandle, Subscription>,
    next_subscription: u64,
    delivered: u64,
    stale_discarded: u64,
}

impl EventRelay {
    /// Create a relay and the receiver the coordination context must drain
    pub fn new() -> (Self, RelayReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                subscriptions: FxHashMap::default(),
                next_subscription: 0,
                delivered: 0,
                stale_discarded: 0,
            },
            rx,
        )
    }

    /// Start relaying `peer`'s events
    ///
    /// A peer that is already subscribed keeps its existing sink. A different peer object under
    /// the same handle replaces the old one, which is unsubscribed first.
    pub fn subscribe(&mut self, peer: Arc<dyn Peer>) {
        let origin = peer.handle();
        if let Some(sub) = self.subscriptions.get(&origin) {
            if same_peer(&sub.peer, &peer) {
                trace!(%origin, "already subscribed");
                return;
            }
            self.unsubscribe(origin);
        }
        let id = self.next_subscription;
        self.next_subscription += 1;
        let live = Arc::new(AtomicBool::new(true));
        let sink = EventSink {
            origin,
            subscription: id,
            live: live.clone(),
            tx: self.tx.clone(),
        };
        debug!(%origin, subscription = id, "subscribing");
        self.subscriptions.insert(
            origin,
            Subscription {
                id,
                live,
                peer: peer.clone(),
            },
        );
        peer.attach(sink);
    }

    /// Stop relaying events from `origin`
    ///
    /// Idempotent. Events from `origin` already sitting in the channel are discarded when they
    /// reach [`accept`](Self::accept). Returns whether a subscription was actually removed.
    pub fn unsubscribe(&mut self, origin: ConnectionHandle) -> bool {
        let Some(sub) = self.subscriptions.remove(&origin) else {
            return false;
        };
        debug!(%origin, "unsubscribing");
        sub.live.store(false, Ordering::Release);
        sub.peer.detach();
        true
    }

    /// Whether `origin` is currently subscribed
    pub fn is_subscribed(&self, origin: ConnectionHandle) -> bool {
        self.subscriptions.contains_key(&origin)
    }

    /// Filter an event drained from the relay channel
    ///
    /// Returns the event if the subscription it was posted through is still the current one for
    /// its origin.
    pub fn accept(&mut self, relayed: RelayedEvent) -> Option<PeerEvent> {
        let current = self
            .subscriptions
            .get(&relayed.origin)
            .is_some_and(|sub| sub.id == relayed.subscription);
        if !current {
            self.stale_discarded += 1;
            debug!(
                discard = ?Discard::StaleConnection(relayed.origin),
                event = ?relayed.event,
                "dropping event"
            );
            return None;
        }
        self.delivered += 1;
        trace!(origin = %relayed.origin, event = ?relayed.event, "relaying");
        Some(relayed.event)
    }

    /// Traffic counters
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            delivered: self.delivered,
            stale_discarded: self.stale_discarded,
            subscriptions: self.subscriptions.len(),
        }
    }
}

/// Whether `a` and `b` are the same peer object
pub(crate) fn same_peer(a: &Arc<dyn Peer>, b: &Arc<dyn Peer>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::RecordingPeer;

    #[test]
    fn events_keep_per_peer_order() {
        let (mut relay, mut rx) = EventRelay::new();
        let peer = RecordingPeer::connected(1);
        relay.subscribe(peer.clone());
        for i in 0..5 {
            assert!(peer.post(PeerEvent::TeleportProgress {
                message: i.to_string()
            }));
        }
        let seen = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|ev| relay.accept(ev))
            .collect::<Vec<_>>();
        let expected = (0..5)
            .map(|i| PeerEvent::TeleportProgress {
                message: i.to_string(),
            })
            .collect::<Vec<_>>();
        assert_eq!(seen, expected);
        assert_eq!(relay.stats().delivered, 5);
    }

    #[test]
    fn queued_events_from_unsubscribed_peer_are_dropped() {
        let (mut relay, mut rx) = EventRelay::new();
        let peer = RecordingPeer::connected(7);
        relay.subscribe(peer.clone());
        assert!(peer.post(PeerEvent::Connected));
        assert!(relay.unsubscribe(ConnectionHandle(7)));
        assert!(!relay.unsubscribe(ConnectionHandle(7)));
        assert_eq!(peer.detach_count(), 1);

        // Posting after unsubscribe is refused at the source
        assert!(!peer.post(PeerEvent::TeleportFinished));

        // The event that was already in flight is discarded on arrival
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.origin(), ConnectionHandle(7));
        assert_eq!(relay.accept(ev), None);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            relay.stats(),
            RelayStats {
                delivered: 0,
                stale_discarded: 1,
                subscriptions: 0,
            }
        );
    }

    #[test]
    fn resubscribing_keeps_the_original_sink() {
        let (mut relay, _rx) = EventRelay::new();
        let peer = RecordingPeer::connected(3);
        relay.subscribe(peer.clone());
        relay.subscribe(peer.clone());
        assert_eq!(peer.attach_count(), 1);
        assert_eq!(relay.stats().subscriptions, 1);
    }

    #[test]
    fn reused_handle_gets_a_fresh_subscription() {
        let (mut relay, mut rx) = EventRelay::new();
        let old = RecordingPeer::connected(4);
        relay.subscribe(old.clone());
        assert!(old.post(PeerEvent::TeleportFinished));

        // Same handle, new session object
        let new = RecordingPeer::connected(4);
        relay.subscribe(new.clone());
        assert_eq!(old.detach_count(), 1);
        assert_eq!(new.attach_count(), 1);
        assert!(!old.post(PeerEvent::Connected));
        assert!(new.post(PeerEvent::Connected));

        let seen = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|ev| relay.accept(ev))
            .collect::<Vec<_>>();
        assert_eq!(seen, vec![PeerEvent::Connected]);
        assert_eq!(relay.stats().stale_discarded, 1);
        assert_eq!(relay.stats().subscriptions, 1);
    }
}
