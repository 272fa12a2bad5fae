//! Timeout constants
//!
//! Defaults for every time bound the core enforces, kept in one place so callers can refer to
//! them when overriding [`NavigatorConfig`](super::NavigatorConfig).

use std::time::Duration;

/// Region lookup timeouts
pub mod resolution {
    use super::*;

    /// How long a region query may stay unanswered before its waiters are told it timed out
    pub const RESOLUTION_TIMEOUT: Duration = Duration::from_secs(30);

    /// Smallest timeout accepted by configuration validation
    pub const MIN_RESOLUTION_TIMEOUT: Duration = Duration::from_millis(1);
}

/// Notification fan-out limits
pub mod updates {
    /// Depth of the broadcast channel carrying navigation updates
    ///
    /// A subscriber that falls this far behind skips ahead and observes a lag error.
    pub const UPDATE_CAPACITY: usize = 64;
}
