use std::time::Duration;

use thiserror::Error;

use crate::{navigation::NavigationState, ConnectionHandle, RegionKey};

/// Reasons a region lookup did not produce a handle
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No live peer to ask
    #[error("not connected")]
    NotConnected,
    /// The peer did not answer within the configured bound
    #[error("no answer for region {region} within {after:?}")]
    ResolutionTimeout {
        /// Region that was being looked up
        region: RegionKey,
        /// The bound that elapsed
        after: Duration,
    },
    /// The peer answered that no such region exists
    #[error("region {region} not found")]
    RegionNotFound {
        /// Region that was being looked up
        region: RegionKey,
    },
}

/// Why a navigation request ended in [`NavigationState::Failed`]
///
/// The `Display` output is the message a UI is expected to show.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavigationFailure {
    /// Lookup attempted with no live peer
    #[error("not connected")]
    NotConnected,
    /// Lookup went unanswered
    #[error("timed out looking up region {0}")]
    ResolutionTimeout(RegionKey),
    /// Peer says the region does not exist
    #[error("region {0} not found")]
    RegionNotFound(RegionKey),
    /// Peer reported a negative teleport outcome
    #[error("{0}")]
    PeerReportedFailure(String),
    /// Peer reported the teleport was cancelled
    #[error("teleport cancelled: {0}")]
    Cancelled(String),
    /// The connection went away during the teleport
    #[error("connection lost")]
    ConnectionLost,
}

impl From<ResolveError> for NavigationFailure {
    fn from(x: ResolveError) -> Self {
        match x {
            ResolveError::NotConnected => Self::NotConnected,
            ResolveError::ResolutionTimeout { region, .. } => Self::ResolutionTimeout(region),
            ResolveError::RegionNotFound { region } => Self::RegionNotFound(region),
        }
    }
}

/// Synchronous rejections of a navigation command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavigationError {
    /// The command does not apply in the current state
    #[error("not possible while {state:?}")]
    NotReady {
        /// State at the time of the command
        state: NavigationState,
    },
    /// A teleport is underway and cannot be superseded
    #[error("teleport in progress")]
    TeleportInProgress,
    /// The coordinator has shut down
    #[error("coordinator closed")]
    Closed,
}

/// The coordinator has shut down
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("coordinator closed")]
pub struct Closed;

impl From<Closed> for NavigationError {
    fn from(_: Closed) -> Self {
        Self::Closed
    }
}

/// Inputs dropped because they no longer correspond to any local intent
///
/// Never surfaced to callers; logged and counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discard {
    /// Event raised by a connection that has since been superseded
    StaleConnection(ConnectionHandle),
    /// Resolution for a navigation request that has since been replaced
    SupersededIntent(u64),
    /// Teleport report with no teleport underway
    NoActiveTeleport,
}
