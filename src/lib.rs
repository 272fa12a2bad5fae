//! Event relay and destination resolution for virtual-world clients
//!
//! A virtual-world client talks to the grid through a session object whose callbacks fire on
//! network worker tasks: connection changes, answers to region lookups, teleport progress. This
//! crate funnels all of those onto one coordination context, and on that context resolves
//! human-entered destinations ("Ahern", 128, 128) into region handles and walks a single
//! navigation request from lookup to arrival.
//!
//! The entry point of this crate is the [`Coordinator`], which runs the coordination context as a
//! tokio task and hands out cloneable [`CoordinatorHandle`]s. The [`Navigator`] it drives is
//! usable on its own by applications that already have a single-threaded event loop.
//!
//! # Pieces
//!
//! - [`EventRelay`] tags each peer event with the connection that raised it and drops events
//!   from connections that have been superseded.
//! - [`ConnectionLifecycle`] owns the current connection and swaps it out atomically.
//! - [`DestinationResolver`] caches region handles and deduplicates in-flight lookups, each with
//!   a bounded wait.
//! - [`NavigationStateMachine`] tracks one request through
//!   `Idle → AwaitingResolution → Ready → Teleporting → Succeeded | Failed`.
//!
//! The grid itself is abstracted as a [`Peer`]: something that can be asked questions and may
//! answer slowly, out of order, twice or never.
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod config;
mod coordinator;
mod error;
mod lifecycle;
mod navigation;
mod navigator;
mod peer;
mod relay;
mod resolver;
mod types;

pub use crate::config::{timeouts, ConfigError, NameMatch, NavigatorConfig};
pub use crate::coordinator::{Coordinator, CoordinatorHandle};
pub use crate::error::{Closed, NavigationError, NavigationFailure, ResolveError};
pub use crate::lifecycle::{ConnectionLifecycle, SwapOutcome};
pub use crate::navigation::{NavigationState, NavigationStateMachine, NavigationUpdate};
pub use crate::navigator::{
    NavigationSnapshot, Navigator, NavigatorStats, ReadyCallback,
};
pub use crate::peer::{Peer, PeerEvent};
pub use crate::relay::{EventRelay, EventSink, RelayReceiver, RelayStats, RelayedEvent};
pub use crate::resolver::{Completion, DestinationResolver, ResolveOutcome, ResolverStats};
pub use crate::types::{
    ConnectionHandle, DestinationRequest, LocalPosition, NavigationTarget, RegionHandle,
    RegionKey, REGION_WIDTH,
};
