//! Configuration loading and management

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cowrite_core::{
    AcceptAll, AutosaveConfig, ConflictResolver, HistoryConfig, RejectAll, RetryPolicy,
    SessionConfig, SuggestionConfig,
};

/// Main configuration for the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Debounce and retry settings for saves
    #[serde(default)]
    pub autosave: AutosaveSection,

    /// Undo/redo history settings
    #[serde(default)]
    pub history: HistorySection,

    /// Suggestion application settings
    #[serde(default)]
    pub suggestions: SuggestionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveSection {
    /// Quiet period before saving (default: 1000ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Retries after a failed save (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1000ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiply the retry delay by this factor per attempt. Unset means a fixed delay.
    #[serde(default)]
    pub retry_backoff_factor: Option<f64>,

    /// Upper bound for exponential retry delays (default: 30s)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff_factor: None,
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    /// Maximum undo entries per draft (default: 50)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    50
}

/// What to do with a suggestion that arrives after unseen edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionSection {
    /// Sync age after which divergent content needs arbitration (default: 2000ms)
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    /// How conflicts are arbitrated (default: accept)
    #[serde(default)]
    pub resolve_conflicts: ConflictPolicy,
}

impl Default for SuggestionSection {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: default_staleness_threshold_ms(),
            resolve_conflicts: ConflictPolicy::default(),
        }
    }
}

fn default_staleness_threshold_ms() -> u64 {
    2000
}

impl DaemonConfig {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: DaemonConfig = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = DaemonConfig::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    pub fn autosave_config(&self) -> AutosaveConfig {
        let section = &self.autosave;
        let initial_delay = Duration::from_millis(section.retry_delay_ms);

        let retry = match section.retry_backoff_factor {
            Some(factor) => RetryPolicy::Exponential {
                initial_delay,
                factor,
                max_delay: Duration::from_millis(section.max_retry_delay_ms),
            },
            None => RetryPolicy::Fixed(initial_delay),
        };

        AutosaveConfig {
            debounce: Duration::from_millis(section.debounce_ms),
            max_retries: section.max_retries,
            retry,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            history: HistoryConfig {
                max_entries: self.history.max_entries,
            },
            suggestion: SuggestionConfig {
                staleness_threshold: Duration::from_millis(
                    self.suggestions.staleness_threshold_ms,
                ),
            },
        }
    }

    pub fn resolver(&self) -> Arc<dyn ConflictResolver> {
        match self.suggestions.resolve_conflicts {
            ConflictPolicy::Accept => Arc::new(AcceptAll),
            ConflictPolicy::Reject => Arc::new(RejectAll),
        }
    }
}
