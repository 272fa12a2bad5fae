//! The coordination context as a tokio task
//!
//! [`Coordinator::spawn`] moves a [`Navigator`] into a task that is the only place it is ever
//! touched. Peers reach the task through the relay channel, everyone else through the command
//! channel behind [`CoordinatorHandle`]. The task also owns the single timer, armed at the
//! resolver's earliest deadline.

use std::{future, sync::Arc, time::Instant};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{sleep_until, Instant as TokioInstant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::{
    lifecycle::SwapOutcome,
    navigator::{NavigationSnapshot, NavigatorStats, ReadyCallback},
    peer::Peer,
    relay::RelayReceiver,
    Closed, ConfigError, ConnectionHandle, DestinationRequest, NavigationError,
    NavigationUpdate, Navigator, NavigatorConfig, RegionHandle, RegionKey, ResolveError,
    ResolveOutcome,
};

enum Command {
    Swap {
        old: Option<ConnectionHandle>,
        new: Option<Arc<dyn Peer>>,
        reply: oneshot::Sender<SwapOutcome>,
    },
    Resolve {
        key: RegionKey,
        on_ready: ReadyCallback,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    NavigateTo {
        request: DestinationRequest,
        reply: oneshot::Sender<Result<(), NavigationError>>,
    },
    ConfirmDeparture {
        reply: oneshot::Sender<Result<(), NavigationError>>,
    },
    Cancel,
    Acknowledge,
    Snapshot {
        reply: oneshot::Sender<NavigationSnapshot>,
    },
    Cached {
        key: RegionKey,
        reply: oneshot::Sender<Option<RegionHandle>>,
    },
    Stats {
        reply: oneshot::Sender<NavigatorStats>,
    },
}

/// Driver task owning a [`Navigator`]
///
/// Runs until [`CoordinatorHandle::close`] is called or every handle has been dropped.
#[must_use = "coordinators must be spawned"]
pub struct Coordinator {
    navigator: Navigator,
    events: RelayReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Spawn a coordinator on the current tokio runtime
    ///
    /// Panics if called outside a runtime, as `tokio::spawn` does.
    pub fn spawn(config: NavigatorConfig) -> Result<CoordinatorHandle, ConfigError> {
        let (driver, handle) = Self::new(config)?;
        tokio::spawn(driver.run().instrument(info_span!("coordinator")));
        Ok(handle)
    }

    /// Create a coordinator without spawning it, for callers that manage their own tasks
    pub fn new(config: NavigatorConfig) -> Result<(Self, CoordinatorHandle), ConfigError> {
        config.validate()?;
        let (updates, _) = broadcast::channel(config.update_capacity);
        let (mut navigator, events) = Navigator::new(config);
        let publisher = updates.clone();
        navigator.on_state_changed(move |update| {
            // No subscribers is fine
            let _ = publisher.send(update.clone());
        });
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        Ok((
            Self {
                navigator,
                events,
                commands,
                shutdown: shutdown.clone(),
            },
            CoordinatorHandle {
                commands: commands_tx,
                updates,
                shutdown,
            },
        ))
    }

    /// Process events, commands and timeouts until shut down
    pub async fn run(mut self) {
        debug!("coordinator started");
        loop {
            if self.shutdown.is_cancelled() {
                debug!("shutdown requested");
                break;
            }
            let deadline = self.navigator.poll_timeout();
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(TokioInstant::from_std(deadline)).await,
                    None => future::pending().await,
                }
            };
            // Not `biased`: a flooding peer must not starve commands or the timer
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                Some(relayed) = self.events.recv() => self.navigator.handle_relayed(relayed),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all handles dropped");
                        break;
                    }
                },
                _ = timer => self.navigator.handle_timeout(now()),
            }
        }
        // Release the peer so it stops posting into a channel nobody reads
        self.navigator.swap_connection(None, None);
        debug!("coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let navigator = &mut self.navigator;
        match command {
            Command::Swap { old, new, reply } => {
                let _ = reply.send(navigator.swap_connection(old, new));
            }
            Command::Resolve {
                key,
                on_ready,
                reply,
            } => {
                let _ = reply.send(navigator.resolve(&key, now(), on_ready));
            }
            Command::NavigateTo { request, reply } => {
                let _ = reply.send(navigator.navigate_to(request, now()));
            }
            Command::ConfirmDeparture { reply } => {
                let _ = reply.send(navigator.confirm_departure());
            }
            Command::Cancel => navigator.cancel(),
            Command::Acknowledge => navigator.acknowledge(),
            Command::Snapshot { reply } => {
                let _ = reply.send(navigator.snapshot());
            }
            Command::Cached { key, reply } => {
                let _ = reply.send(navigator.cached(&key));
            }
            Command::Stats { reply } => {
                let _ = reply.send(navigator.stats());
            }
        }
    }
}

fn now() -> Instant {
    TokioInstant::now().into_std()
}

/// Cloneable entry point to a running coordinator
///
/// Every method may be called from any task. Commands are applied in the order they are sent.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<NavigationUpdate>,
    shutdown: CancellationToken,
}

impl CoordinatorHandle {
    /// Replace connection `old` with `new`; see [`Navigator::swap_connection`]
    pub async fn swap_connection(
        &self,
        old: Option<ConnectionHandle>,
        new: Option<Arc<dyn Peer>>,
    ) -> Result<SwapOutcome, Closed> {
        self.request(|reply| Command::Swap { old, new, reply }).await
    }

    /// Look `key` up and wait for the final outcome
    ///
    /// A coordinator that has shut down has no connection, so this reports
    /// [`ResolveError::NotConnected`] in that case.
    pub async fn resolve(&self, key: impl Into<RegionKey>) -> Result<RegionHandle, ResolveError> {
        let (tx, rx) = oneshot::channel();
        let outcome = self
            .resolve_with(key, move |result| {
                let _ = tx.send(result);
            })
            .await
            .map_err(|Closed| ResolveError::NotConnected)?;
        match outcome {
            ResolveOutcome::NotConnected => Err(ResolveError::NotConnected),
            ResolveOutcome::Ready(_) | ResolveOutcome::Pending => {
                rx.await.unwrap_or(Err(ResolveError::NotConnected))
            }
        }
    }

    /// Look `key` up, calling `on_ready` on the coordination context once the outcome is known
    pub async fn resolve_with<F>(
        &self,
        key: impl Into<RegionKey>,
        on_ready: F,
    ) -> Result<ResolveOutcome, Closed>
    where
        F: FnOnce(Result<RegionHandle, ResolveError>) + Send + 'static,
    {
        let key = key.into();
        let on_ready: ReadyCallback = Box::new(on_ready);
        self.request(|reply| Command::Resolve {
            key,
            on_ready,
            reply,
        })
        .await
    }

    /// Start navigating to `request`
    ///
    /// Returns once the request has been accepted; progress arrives through
    /// [`subscribe`](Self::subscribe).
    pub async fn navigate_to(&self, request: DestinationRequest) -> Result<(), NavigationError> {
        self.request(|reply| Command::NavigateTo { request, reply })
            .await?
    }

    /// Depart for the resolved destination
    pub async fn confirm_departure(&self) -> Result<(), NavigationError> {
        self.request(|reply| Command::ConfirmDeparture { reply })
            .await?
    }

    /// Abandon the current request
    pub fn cancel(&self) -> Result<(), Closed> {
        self.send(Command::Cancel)
    }

    /// Return to idle after a finished request
    pub fn acknowledge(&self) -> Result<(), Closed> {
        self.send(Command::Acknowledge)
    }

    /// Read-only view of navigation and connection state
    pub async fn snapshot(&self) -> Result<NavigationSnapshot, Closed> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Cached handle for `key`
    pub async fn cached(&self, key: impl Into<RegionKey>) -> Result<Option<RegionHandle>, Closed> {
        let key = key.into();
        self.request(|reply| Command::Cached { key, reply }).await
    }

    /// Activity counters
    pub async fn stats(&self) -> Result<NavigatorStats, Closed> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Receive every navigation update published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<NavigationUpdate> {
        self.updates.subscribe()
    }

    /// Stop the coordinator
    ///
    /// The current peer is released and pending lookups complete with
    /// [`ResolveError::NotConnected`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether the coordinator has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), Closed> {
        self.commands.send(command).map_err(|_| Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Closed> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| Closed)
    }
}
