//! Configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use lt_core::{PolicyKind, TrackerConfig, TrackerPolicy};
use serde::{Deserialize, Serialize};

use crate::threshold::ScrobbleThreshold;

/// Policy selection for one named source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: PolicyKind,
    /// Overrides the policy's default allowed drift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_drift_ms: Option<u64>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timeouts and tolerances shared by every tracker.
    pub tracker: TrackerConfig,
    /// Policy for sources without an entry in `sources`.
    pub default_kind: PolicyKind,
    /// Per-source policy selection, keyed by source name.
    pub sources: BTreeMap<String, SourceConfig>,
    pub threshold: ScrobbleThreshold,
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // LT_TRACKER__STALE_AFTER_MS and friends
        figment = figment.merge(Env::prefixed("LT_").split("__"));

        figment.extract()
    }

    /// The policy trackers of `source` are built with.
    pub fn policy_for(&self, source: &str) -> TrackerPolicy {
        match self.sources.get(source) {
            Some(selected) => {
                let policy = TrackerPolicy::for_kind(selected.kind);
                match selected.allowed_drift_ms {
                    Some(ms) => policy.with_allowed_drift(Duration::from_millis(ms)),
                    None => policy,
                }
            }
            None => TrackerPolicy::for_kind(self.default_kind),
        }
    }
}

/// Returns the platform-specific config directory for lt.
///
/// On Linux: `~/.config/lt`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lt"))
}
