//! Session configuration.

use crate::SyncError;
use localsync_core::text::ROOT_SITE;
use localsync_core::Hlc;
use uuid::Uuid;

/// Default bound on how far a received stamp may run ahead of local time.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

/// Configuration shared by every collection of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Site identifier stamped into every local edit
    pub site: String,

    /// Warn when a remote stamp is further ahead of local time than this
    pub max_drift_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            site: Uuid::new_v4().to_string(),
            max_drift_ms: Some(DEFAULT_MAX_DRIFT_MS),
        }
    }
}

impl SessionConfig {
    /// Configuration for an explicit site id.
    #[must_use]
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            ..Self::default()
        }
    }

    /// Check the site id can be used to mint identifiers.
    ///
    /// # Errors
    ///
    /// Returns error if the site is empty or reserved.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.site.is_empty() {
            return Err(SyncError::Config("site id must not be empty".to_string()));
        }
        if self.site == ROOT_SITE {
            return Err(SyncError::Config(format!(
                "site id '{ROOT_SITE}' is reserved"
            )));
        }
        Ok(())
    }

    /// A fresh clock for this site.
    #[must_use]
    pub fn clock(&self) -> Hlc {
        let clock = Hlc::new(self.site.clone());
        match self.max_drift_ms {
            Some(max_drift) => clock.with_max_drift(max_drift),
            None => clock,
        }
    }
}
