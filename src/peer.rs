use std::fmt::Debug;

use crate::{relay::EventSink, ConnectionHandle, NavigationTarget, RegionHandle};

/// The live virtual-world connection, seen as an asynchronous question-answering peer
///
/// Every method is called from the coordination context and must return promptly: queries and
/// teleports are expected to be handed off to worker tasks, whose outcomes come back as
/// [`PeerEvent`]s posted through the [`EventSink`] given to [`Peer::attach`]. Answers may come
/// late, out of order, twice, or never.
pub trait Peer: Send + Sync + Debug + 'static {
    /// Identity of this session
    fn handle(&self) -> ConnectionHandle;

    /// Whether the session is currently able to answer queries
    fn is_connected(&self) -> bool;

    /// Start delivering events through `sink`
    ///
    /// Called once when the peer becomes the current connection.
    fn attach(&self, sink: EventSink);

    /// Stop delivering events
    ///
    /// Called at most once, when the peer is superseded. The sink handed to `attach` is already
    /// dead by then, so events posted afterwards are dropped regardless.
    fn detach(&self);

    /// Ask the grid for the handle of the region called `name`
    ///
    /// The answer arrives as [`PeerEvent::RegionFound`] or [`PeerEvent::RegionNotFound`].
    fn request_region(&self, name: &str);

    /// Ask the grid to move the avatar to `target`
    ///
    /// Progress and the outcome arrive as teleport events.
    fn request_teleport(&self, target: &NavigationTarget);

    /// Ask the grid to abandon the teleport underway
    ///
    /// The peer confirms with [`PeerEvent::TeleportCancelled`], or the teleport completes anyway.
    fn cancel_teleport(&self) {}
}

/// Events raised by a peer on its worker tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The session finished logging in
    Connected,
    /// The session went away
    Disconnected {
        /// Human-readable reason given by the peer
        reason: String,
    },
    /// Answer to a region query
    RegionFound {
        /// The region's canonical name, which may differ in case from the query
        name: String,
        /// The resolved region
        handle: RegionHandle,
    },
    /// Negative answer to a region query
    RegionNotFound {
        /// The name that was queried
        name: String,
    },
    /// Intermediate teleport status
    TeleportProgress {
        /// Status text from the grid
        message: String,
    },
    /// The avatar arrived at the destination
    TeleportFinished,
    /// The teleport failed
    TeleportFailed {
        /// Reason given by the grid
        message: String,
    },
    /// The teleport was cancelled
    TeleportCancelled {
        /// Reason given by the grid
        message: String,
    },
}
