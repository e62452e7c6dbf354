//! CLI configuration.

use anyhow::{Context, Result};
use localsync_sync::SessionConfig;

/// Configuration read from the environment.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Prefix for demo site ids
    pub site: Option<String>,

    /// Drift bound for session clocks
    pub max_drift_ms: Option<u64>,

    /// Collection the demo writes to
    pub collection: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            site: None,
            max_drift_ms: SessionConfig::default().max_drift_ms,
            collection: "recipes".to_string(),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOCALSYNC_SITE_ID`: site id prefix for demo sessions
    /// - `LOCALSYNC_MAX_DRIFT_MS`: clock drift bound in milliseconds
    /// - `LOCALSYNC_COLLECTION`: collection name used by the demo
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(site) = std::env::var("LOCALSYNC_SITE_ID") {
            config.site = Some(site);
        }

        if let Ok(drift) = std::env::var("LOCALSYNC_MAX_DRIFT_MS") {
            config.max_drift_ms =
                Some(drift.parse().context("Invalid LOCALSYNC_MAX_DRIFT_MS")?);
        }

        if let Ok(collection) = std::env::var("LOCALSYNC_COLLECTION") {
            anyhow::ensure!(!collection.is_empty(), "LOCALSYNC_COLLECTION is empty");
            config.collection = collection;
        }

        Ok(config)
    }

    /// Session configuration for the demo participant `name`.
    #[must_use]
    pub fn session(&self, name: &str) -> SessionConfig {
        let site = match &self.site {
            Some(prefix) => format!("{prefix}-{name}"),
            None => name.to_string(),
        };
        SessionConfig {
            site,
            max_drift_ms: self.max_drift_ms,
        }
    }
}
