use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    peer::Peer,
    relay::{same_peer, EventRelay},
    ConnectionHandle,
};

/// Owner of the current peer connection
///
/// Replacing the connection always goes through [`swap`](Self::swap), which unwires the old
/// peer before wiring the new one. Because it runs on the coordination context, no event is
/// accepted between the two halves, so there is never a moment when both peers (or, with a
/// replacement, neither) are relayed.
#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    current: Option<Arc<dyn Peer>>,
}

/// What a [`ConnectionLifecycle::swap`] actually changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Connections whose subscriptions were removed by this call
    pub unsubscribed: Vec<ConnectionHandle>,
    /// Connection that became current, if any
    pub subscribed: Option<ConnectionHandle>,
}

impl SwapOutcome {
    /// Whether the current connection changed
    pub fn changed(&self) -> bool {
        !self.unsubscribed.is_empty() || self.subscribed.is_some()
    }
}

impl ConnectionLifecycle {
    /// Replace `old` with `new`
    ///
    /// `old` is unsubscribed, as is the current connection unless `new` is that very peer
    /// object, so at most one peer is ever wired. A different peer object reusing the current
    /// handle counts as a new connection. Passing `None` for `new` only disconnects. Unsubscribing
    /// is idempotent: a handle that was already released (for instance by a swap run while
    /// handling that same peer's disconnect event) is not detached a second time.
    pub fn swap(
        &mut self,
        relay: &mut EventRelay,
        old: Option<ConnectionHandle>,
        new: Option<Arc<dyn Peer>>,
    ) -> SwapOutcome {
        let mut outcome = SwapOutcome::default();
        let new_handle = new.as_ref().map(|peer| peer.handle());
        let keep_current = match (&self.current, &new) {
            (Some(current), Some(new)) => same_peer(current, new),
            _ => false,
        };

        if keep_current {
            if let Some(old) = old.filter(|&h| Some(h) != new_handle) {
                if relay.unsubscribe(old) {
                    outcome.unsubscribed.push(old);
                }
            }
        } else {
            // A reconnect may reuse the old handle, so the current handle is released too
            let current = self.current.take().map(|peer| peer.handle());
            for handle in old.into_iter().chain(current) {
                if relay.unsubscribe(handle) {
                    outcome.unsubscribed.push(handle);
                }
            }
            if let Some(peer) = new {
                let handle = peer.handle();
                relay.subscribe(peer.clone());
                self.current = Some(peer);
                outcome.subscribed = Some(handle);
            }
        }

        match (outcome.unsubscribed.as_slice(), outcome.subscribed) {
            ([], None) => debug!(?old, new = ?new_handle, "swap was a no-op"),
            (released, Some(new)) => info!(?released, %new, "connection replaced"),
            (released, None) => info!(?released, "connection released"),
        }
        outcome
    }

    /// The current peer, if any
    pub fn current(&self) -> Option<&Arc<dyn Peer>> {
        self.current.as_ref()
    }

    /// Identity of the current peer, if any
    pub fn current_handle(&self) -> Option<ConnectionHandle> {
        self.current.as_ref().map(|peer| peer.handle())
    }

    /// Whether there is a current peer and it reports itself connected
    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(|peer| peer.is_connected())
    }
}
