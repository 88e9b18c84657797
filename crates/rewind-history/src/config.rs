#![forbid(unsafe_code)]

//! History configuration as data.
//!
//! [`HistoryConfig`] holds every tunable of an [`UndoStack`](crate::UndoStack)
//! and can be loaded from JSON (always) or TOML (feature `toml-config`) so
//! hosts can change limits without recompiling.
//!
//! ```toml
//! # rewind.toml
//! max_depth = 200
//! batch_notifications = true
//! max_snapshot_actions = 10000
//! ```
//!
//! ```rust,ignore
//! let config = HistoryConfig::from_toml_file("rewind.toml")?;
//! let config = HistoryConfig::from_json_str(r#"{"max_depth": 50}"#)?;
//! ```
//!
//! # Defaults
//!
//! `HistoryConfig::default()` keeps every action, coalesces store
//! notifications per operation and loads snapshots of any size.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunables for an [`UndoStack`](crate::UndoStack).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of actions kept after the Init action (0 = unlimited).
    /// The oldest actions are evicted first.
    pub max_depth: usize,

    /// Wrap each apply/revert sequence in a
    /// [`BatchScope`](rewind_cell::BatchScope) so every store notifies at most
    /// once per operation.
    pub batch_notifications: bool,

    /// Largest snapshot `load_snapshot` accepts, counted in action records
    /// at every nesting level (group children included, Init included).
    /// 0 = unlimited.
    pub max_snapshot_actions: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: 0,
            batch_notifications: true,
            max_snapshot_actions: 0,
        }
    }
}

impl HistoryConfig {
    /// Set the depth bound (0 = unlimited).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_batch_notifications(mut self, enabled: bool) -> Self {
        self.batch_notifications = enabled;
        self
    }

    #[must_use]
    pub fn with_max_snapshot_actions(mut self, limit: usize) -> Self {
        self.max_snapshot_actions = limit;
        self
    }

    /// Load from a TOML string.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str::<Self>(s)
            .map_err(ConfigError::Toml)?
            .validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(s)
            .map_err(ConfigError::Json)?
            .validated()
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check cross-field constraints.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Init plus max_depth ungrouped actions must always load.
        if self.max_snapshot_actions != 0
            && self.max_depth != 0
            && self.max_snapshot_actions <= self.max_depth
        {
            errors.push(format!(
                "max_snapshot_actions ({}) must exceed max_depth ({})",
                self.max_snapshot_actions, self.max_depth
            ));
        }

        if self.max_snapshot_actions == 1 {
            errors.push("max_snapshot_actions must be 0 (unlimited) or > 1".into());
        }

        errors
    }

    fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Errors from loading a [`HistoryConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "toml-config")]
    Toml(toml::de::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "toml-config")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "toml-config")]
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
