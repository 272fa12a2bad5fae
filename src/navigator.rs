use std::{fmt, sync::Arc, time::Instant};

use tracing::{debug, info};

use crate::{
    lifecycle::{ConnectionLifecycle, SwapOutcome},
    navigation::{Cancel, NavigationStateMachine},
    peer::Peer,
    relay::{EventRelay, RelayReceiver, RelayStats, RelayedEvent},
    resolver::{Completion, DestinationResolver, ResolveOutcome, ResolverStats},
    ConnectionHandle, DestinationRequest, NavigationError, NavigationFailure, NavigationState,
    NavigationTarget, NavigationUpdate, NavigatorConfig, PeerEvent, RegionHandle, RegionKey,
    ResolveError,
};

/// Completion callback for [`Navigator::resolve`]
pub type ReadyCallback = Box<dyn FnOnce(Result<RegionHandle, ResolveError>) + Send>;

type StateListener = Box<dyn FnMut(&NavigationUpdate) + Send>;

/// Someone waiting on a region lookup
enum Waiter {
    /// An external caller of `resolve`
    Caller(ReadyCallback),
    /// The navigation request with this intent id
    Navigation(u64),
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller(_) => f.write_str("Caller"),
            Self::Navigation(id) => f.debug_tuple("Navigation").field(id).finish(),
        }
    }
}

/// Read-only view for periodic refresh by external collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationSnapshot {
    /// Current navigation state
    pub state: NavigationState,
    /// Resolved destination, if any
    pub target: Option<NavigationTarget>,
    /// Last published detail message
    pub detail: String,
    /// Current connection, if any
    pub connection: Option<ConnectionHandle>,
    /// Whether the current connection reports itself connected
    pub connected: bool,
}

/// Combined activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigatorStats {
    /// Event relay counters
    pub relay: RelayStats,
    /// Resolver counters
    pub resolver: ResolverStats,
}

/// The coordination-context core
///
/// Owns the relay, the current connection, the resolver and the navigation state machine, and
/// must only ever be used from one context at a time. It performs no I/O and reads no clock:
/// relayed events, the current time and timer expiry are all fed in by the caller, normally the
/// [`Coordinator`](crate::Coordinator) task.
pub struct Navigator {
    config: NavigatorConfig,
    relay: EventRelay,
    lifecycle: ConnectionLifecycle,
    resolver: DestinationResolver<Waiter>,
    machine: NavigationStateMachine,
    listeners: Vec<StateListener>,
}

impl Navigator {
    /// Create a navigator and the relay receiver whose events must be fed to
    /// [`handle_relayed`](Self::handle_relayed)
    pub fn new(config: NavigatorConfig) -> (Self, RelayReceiver) {
        let (relay, events) = EventRelay::new();
        let resolver = DestinationResolver::new(config.name_match, config.resolution_timeout);
        (
            Self {
                config,
                relay,
                lifecycle: ConnectionLifecycle::default(),
                resolver,
                machine: NavigationStateMachine::default(),
                listeners: Vec::new(),
            },
            events,
        )
    }

    /// Register a listener for navigation updates
    ///
    /// Listeners run on the coordination context and must not block.
    pub fn on_state_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&NavigationUpdate) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Replace the current connection
    ///
    /// Queries sent on a released connection can no longer be answered; their callers are
    /// completed with [`ResolveError::NotConnected`]. A teleport underway fails.
    pub fn swap_connection(
        &mut self,
        old: Option<ConnectionHandle>,
        new: Option<Arc<dyn Peer>>,
    ) -> SwapOutcome {
        let outcome = self.lifecycle.swap(&mut self.relay, old, new);
        if !outcome.unsubscribed.is_empty() {
            let abandoned = self
                .resolver
                .abandon_stale(self.lifecycle.current_handle(), &outcome.unsubscribed);
            self.complete(abandoned);
            if let Some(update) = self.machine.connection_lost() {
                self.publish(update);
            }
        }
        outcome
    }

    /// Look up `key`, calling `on_ready` once the outcome is known
    ///
    /// On a cache hit `on_ready` runs before this returns. When not connected it is dropped
    /// without being called and the outcome says so.
    pub fn resolve<F>(&mut self, key: &RegionKey, now: Instant, on_ready: F) -> ResolveOutcome
    where
        F: FnOnce(Result<RegionHandle, ResolveError>) + Send + 'static,
    {
        let peer = self.lifecycle.current().map(|peer| &**peer);
        let (outcome, done) =
            self.resolver
                .resolve(key, peer, now, Waiter::Caller(Box::new(on_ready)));
        self.complete(done);
        outcome
    }

    /// Start navigating to `request`, superseding any request not yet departed
    ///
    /// Progress is reported through the state listeners.
    pub fn navigate_to(
        &mut self,
        request: DestinationRequest,
        now: Instant,
    ) -> Result<(), NavigationError> {
        let key = request.region.clone();
        let id = self.machine.begin(request)?;
        let peer = self.lifecycle.current().map(|peer| &**peer);
        let (outcome, done) = self
            .resolver
            .resolve(&key, peer, now, Waiter::Navigation(id));
        match outcome {
            ResolveOutcome::Ready(_) => self.complete(done),
            ResolveOutcome::Pending => {
                let update = self.machine.update();
                self.publish(update);
            }
            ResolveOutcome::NotConnected => {
                if let Some(update) = self.machine.resolved(id, Err(ResolveError::NotConnected)) {
                    self.publish(update);
                }
            }
        }
        Ok(())
    }

    /// Depart for the resolved destination
    pub fn confirm_departure(&mut self) -> Result<(), NavigationError> {
        let target = self.machine.confirm()?;
        let peer = self
            .lifecycle
            .current()
            .filter(|peer| peer.is_connected())
            .cloned();
        let update = match peer {
            Some(peer) => {
                info!(region = %target.region, handle = %target.handle, "departing");
                peer.request_teleport(&target);
                Some(self.machine.update())
            }
            None => self.machine.fail(NavigationFailure::NotConnected),
        };
        if let Some(update) = update {
            self.publish(update);
        }
        Ok(())
    }

    /// Abandon the current request
    ///
    /// An unresolved or ready request is dropped immediately. A teleport underway can only be
    /// asked to stop; the peer reports the outcome.
    pub fn cancel(&mut self) {
        match self.machine.cancel() {
            Cancel::Dropped(update) => self.publish(update),
            Cancel::AskPeer => {
                if let Some(peer) = self.lifecycle.current() {
                    debug!("asking peer to cancel teleport");
                    peer.cancel_teleport();
                }
            }
            Cancel::Nothing => {}
        }
    }

    /// Return to idle after a finished request
    pub fn acknowledge(&mut self) {
        if let Some(update) = self.machine.acknowledge() {
            self.publish(update);
        }
    }

    /// Process one event drained from the relay receiver
    pub fn handle_relayed(&mut self, relayed: RelayedEvent) {
        let origin = relayed.origin();
        let Some(event) = self.relay.accept(relayed) else {
            return;
        };
        match event {
            PeerEvent::Connected => info!(%origin, "peer connected"),
            PeerEvent::Disconnected { reason } => {
                info!(%origin, %reason, "peer disconnected");
                self.swap_connection(Some(origin), None);
            }
            PeerEvent::RegionFound { name, handle } => {
                let done = self.resolver.region_found(&name, handle);
                self.complete(done);
            }
            PeerEvent::RegionNotFound { name } => {
                let done = self.resolver.region_not_found(&name);
                self.complete(done);
            }
            PeerEvent::TeleportProgress { .. }
            | PeerEvent::TeleportFinished
            | PeerEvent::TeleportFailed { .. }
            | PeerEvent::TeleportCancelled { .. } => {
                if let Some(update) = self.machine.teleport_event(&event) {
                    self.publish(update);
                }
            }
        }
    }

    /// Earliest time at which [`handle_timeout`](Self::handle_timeout) has work to do
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.resolver.poll_timeout()
    }

    /// Expire lookups whose deadline is at or before `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        let expired = self.resolver.handle_timeout(now);
        self.complete(expired);
    }

    /// Current navigation state
    pub fn state(&self) -> NavigationState {
        self.machine.state()
    }

    /// Resolved destination of the current request
    pub fn target(&self) -> Option<&NavigationTarget> {
        self.machine.target()
    }

    /// Read-only view of navigation and connection state
    pub fn snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            state: self.machine.state(),
            target: self.machine.target().cloned(),
            detail: self.machine.detail().to_owned(),
            connection: self.lifecycle.current_handle(),
            connected: self.lifecycle.is_connected(),
        }
    }

    /// Cached handle for `key`
    pub fn cached(&self, key: &RegionKey) -> Option<RegionHandle> {
        self.resolver.cached(key)
    }

    /// Activity counters
    pub fn stats(&self) -> NavigatorStats {
        NavigatorStats {
            relay: self.relay.stats(),
            resolver: self.resolver.stats(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    fn complete(&mut self, completions: impl IntoIterator<Item = Completion<Waiter>>) {
        for (waiter, result) in completions {
            match waiter {
                Waiter::Caller(on_ready) => on_ready(result),
                Waiter::Navigation(id) => {
                    if let Some(update) = self.machine.resolved(id, result) {
                        self.publish(update);
                    }
                }
            }
        }
    }

    fn publish(&mut self, update: NavigationUpdate) {
        debug!(state = ?update.state, detail = %update.detail, "navigation update");
        for listener in &mut self.listeners {
            listener(&update);
        }
    }
}

impl fmt::Debug for Navigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigator")
            .field("config", &self.config)
            .field("relay", &self.relay)
            .field("lifecycle", &self.lifecycle)
            .field("resolver", &self.resolver)
            .field("machine", &self.machine)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
