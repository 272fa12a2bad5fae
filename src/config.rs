use std::time::Duration;

use thiserror::Error;

pub mod timeouts;

use timeouts::{resolution, updates};

/// How region names are compared when matching queries, replies and cache entries
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum NameMatch {
    /// Ignore surrounding whitespace and letter case
    ///
    /// The grid answers with the region's canonical spelling, which routinely differs in case
    /// from what the user typed ("ahern" vs "Ahern").
    #[default]
    CaseInsensitive,
    /// Byte-for-byte comparison against the canonical name returned by the peer
    Exact,
}

impl NameMatch {
    /// Reduce `name` to the form used as a table key under this policy
    pub fn normalize(self, name: &str) -> String {
        match self {
            Self::CaseInsensitive => name.trim().to_lowercase(),
            Self::Exact => name.to_owned(),
        }
    }
}

/// Parameters governing resolution and notification
///
/// Default values are suitable for a desktop client talking to a public grid.
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    pub(crate) resolution_timeout: Duration,
    pub(crate) name_match: NameMatch,
    pub(crate) update_capacity: usize,
}

impl NavigatorConfig {
    /// How long a region query may go unanswered before its callers are told it timed out
    ///
    /// The query itself cannot be withdrawn from the peer; a late answer still fills the cache.
    pub fn resolution_timeout(&mut self, value: Duration) -> &mut Self {
        self.resolution_timeout = value;
        self
    }

    /// Policy used to compare region names
    pub fn name_match(&mut self, value: NameMatch) -> &mut Self {
        self.name_match = value;
        self
    }

    /// Number of navigation updates buffered for each broadcast subscriber
    pub fn update_capacity(&mut self, value: usize) -> &mut Self {
        self.update_capacity = value;
        self
    }

    /// Check that the configuration can be used to drive a coordinator
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution_timeout < resolution::MIN_RESOLUTION_TIMEOUT {
            return Err(ConfigError::ZeroResolutionTimeout);
        }
        if self.update_capacity == 0 {
            return Err(ConfigError::ZeroUpdateCapacity);
        }
        Ok(())
    }
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            resolution_timeout: resolution::RESOLUTION_TIMEOUT,
            name_match: NameMatch::default(),
            update_capacity: updates::UPDATE_CAPACITY,
        }
    }
}

/// Errors in the parameters being used to create a coordinator
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Resolution timeout must be positive
    #[error("resolution timeout must be positive")]
    ZeroResolutionTimeout,
    /// Broadcast channels cannot be created with zero capacity
    #[error("update capacity must be positive")]
    ZeroUpdateCapacity,
}
