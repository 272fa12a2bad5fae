use tracing::{debug, trace};

use crate::{
    error::Discard, DestinationRequest, NavigationError, NavigationFailure, NavigationTarget,
    PeerEvent, RegionHandle, ResolveError,
};

/// Lifecycle of one "go to this destination" request
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum NavigationState {
    /// Nothing requested
    #[default]
    Idle,
    /// Waiting for the destination's region to be resolved
    AwaitingResolution,
    /// Destination resolved; waiting for the user to depart
    Ready,
    /// The peer is moving the avatar
    Teleporting,
    /// The avatar arrived
    Succeeded,
    /// The request could not be completed
    Failed,
}

impl NavigationState {
    /// Whether the request has finished, successfully or not
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Notification published on every visible change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationUpdate {
    /// State after the change
    pub state: NavigationState,
    /// The request being served, if any
    pub request: Option<DestinationRequest>,
    /// Resolved destination, once known
    pub target: Option<NavigationTarget>,
    /// Message suitable for display
    pub detail: String,
    /// Set when `state` is [`NavigationState::Failed`]
    pub failure: Option<NavigationFailure>,
}

/// What [`NavigationStateMachine::cancel`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cancel {
    /// The request was dropped locally
    Dropped(NavigationUpdate),
    /// A teleport is underway; the peer must be asked to abandon it
    AskPeer,
    /// Nothing to cancel
    Nothing,
}

#[derive(Debug)]
struct Intent {
    id: u64,
    request: DestinationRequest,
    target: Option<NavigationTarget>,
}

/// Holder of the single [`NavigationState`]
///
/// Methods are the only way to change state, and each returns the update to publish, if the
/// change is visible. Inputs that do not correspond to the current intent are discarded.
#[derive(Debug, Default)]
pub struct NavigationStateMachine {
    state: NavigationState,
    next_intent: u64,
    intent: Option<Intent>,
    detail: String,
    failure: Option<NavigationFailure>,
}

impl NavigationStateMachine {
    /// Current state
    pub fn state(&self) -> NavigationState {
        self.state
    }

    /// Resolved destination of the current request, if any
    pub fn target(&self) -> Option<&NavigationTarget> {
        self.intent.as_ref().and_then(|i| i.target.as_ref())
    }

    /// Last published detail message
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Start serving `request`, superseding any request not yet departed
    ///
    /// The machine enters [`NavigationState::AwaitingResolution`] without publishing; the caller
    /// publishes once it knows whether the lookup completed synchronously.
    pub(crate) fn begin(&mut self, request: DestinationRequest) -> Result<u64, NavigationError> {
        if self.state == NavigationState::Teleporting {
            return Err(NavigationError::TeleportInProgress);
        }
        if let Some(old) = self.intent.take() {
            match self.state {
                NavigationState::AwaitingResolution | NavigationState::Ready => {
                    debug!(intent = old.id, region = %old.request.region, "request superseded");
                }
                _ => trace!(intent = old.id, state = ?self.state, "clearing finished request"),
            }
        }
        let id = self.next_intent;
        self.next_intent += 1;
        self.detail = format!("Looking up region {}", request.region);
        self.failure = None;
        self.intent = Some(Intent {
            id,
            request,
            target: None,
        });
        self.state = NavigationState::AwaitingResolution;
        Ok(id)
    }

    /// Apply the lookup result for intent `id`
    ///
    /// Results for anything but the current, still unresolved intent are discarded.
    pub(crate) fn resolved(
        &mut self,
        id: u64,
        result: Result<RegionHandle, ResolveError>,
    ) -> Option<NavigationUpdate> {
        let current = self.intent.as_mut().filter(|i| i.id == id);
        let intent = match current {
            Some(intent) if self.state == NavigationState::AwaitingResolution => intent,
            _ => {
                debug!(discard = ?Discard::SupersededIntent(id), "ignoring resolution");
                return None;
            }
        };
        match result {
            Ok(handle) => {
                let target = NavigationTarget {
                    region: intent.request.region.clone(),
                    handle,
                    local: intent.request.local,
                };
                self.detail = format!("Ready to teleport to {} ({})", target.region, handle);
                intent.target = Some(target);
                self.state = NavigationState::Ready;
            }
            Err(e) => {
                self.fail_with(e.into());
            }
        }
        Some(self.update())
    }

    /// Depart for the resolved destination
    pub(crate) fn confirm(&mut self) -> Result<NavigationTarget, NavigationError> {
        let target = match (self.state, self.target()) {
            (NavigationState::Ready, Some(target)) => target.clone(),
            (state, _) => return Err(NavigationError::NotReady { state }),
        };
        self.state = NavigationState::Teleporting;
        self.detail = format!("Teleporting to {}", target.region);
        Ok(target)
    }

    /// Apply a teleport report from the peer
    pub(crate) fn teleport_event(&mut self, event: &PeerEvent) -> Option<NavigationUpdate> {
        if self.state != NavigationState::Teleporting {
            debug!(discard = ?Discard::NoActiveTeleport, ?event, "ignoring teleport report");
            return None;
        }
        match event {
            PeerEvent::TeleportProgress { message } => {
                self.detail = message.clone();
            }
            PeerEvent::TeleportFinished => {
                self.state = NavigationState::Succeeded;
                self.detail = match &self.intent {
                    Some(intent) => format!("Arrived at {}", intent.request.region),
                    None => "Arrived".to_owned(),
                };
            }
            PeerEvent::TeleportFailed { message } => {
                self.fail_with(NavigationFailure::PeerReportedFailure(message.clone()));
            }
            PeerEvent::TeleportCancelled { message } => {
                self.fail_with(NavigationFailure::Cancelled(message.clone()));
            }
            _ => return None,
        }
        Some(self.update())
    }

    /// Fail the request outright, whatever state it is in
    pub(crate) fn fail(&mut self, failure: NavigationFailure) -> Option<NavigationUpdate> {
        if self.intent.is_none() || self.state.is_terminal() {
            return None;
        }
        self.fail_with(failure);
        Some(self.update())
    }

    /// The connection went away
    ///
    /// Only a teleport underway is affected here; unresolved requests fail through the
    /// resolver, and a ready request fails when the user tries to depart.
    pub(crate) fn connection_lost(&mut self) -> Option<NavigationUpdate> {
        if self.state != NavigationState::Teleporting {
            return None;
        }
        self.fail_with(NavigationFailure::ConnectionLost);
        Some(self.update())
    }

    /// Return to idle after a finished request
    pub(crate) fn acknowledge(&mut self) -> Option<NavigationUpdate> {
        if !self.state.is_terminal() {
            return None;
        }
        self.reset();
        Some(self.update())
    }

    /// Abandon the current request
    pub(crate) fn cancel(&mut self) -> Cancel {
        match self.state {
            NavigationState::AwaitingResolution | NavigationState::Ready => {
                self.reset();
                Cancel::Dropped(self.update())
            }
            NavigationState::Teleporting => Cancel::AskPeer,
            _ => Cancel::Nothing,
        }
    }

    /// Build the notification describing the current state
    pub fn update(&self) -> NavigationUpdate {
        NavigationUpdate {
            state: self.state,
            request: self.intent.as_ref().map(|i| i.request.clone()),
            target: self.target().cloned(),
            detail: self.detail.clone(),
            failure: self.failure.clone(),
        }
    }

    fn fail_with(&mut self, failure: NavigationFailure) {
        self.state = NavigationState::Failed;
        self.detail = failure.to_string();
        self.failure = Some(failure);
    }

    fn reset(&mut self) {
        self.state = NavigationState::Idle;
        self.intent = None;
        self.detail.clear();
        self.failure = None;
    }
}
