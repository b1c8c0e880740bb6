//! Configuration types.
//!
//! All types implement [`Default`] for compile-time fallback values.

use serde::{Deserialize, Serialize};

/// Main configuration structure, after merging all layers.
///
/// # Example
///
/// ```
/// use tagbot_runtime::config::RuntimeConfig;
///
/// let config = RuntimeConfig::default();
/// assert_eq!(config.energy.budget, 100_000);
/// assert_eq!(config.tags.creator, "creator");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Script energy budget.
    pub energy: EnergyConfig,

    /// Dispatch limits and defaults.
    pub dispatch: DispatchConfig,

    /// Names of the tags the runtime itself interprets.
    pub tags: TagNamesConfig,
}

impl RuntimeConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes to TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` only if they
    /// differ from the default.
    pub fn merge(&mut self, other: &Self) {
        self.energy.merge(&other.energy);
        self.dispatch.merge(&other.dispatch);
        self.tags.merge(&other.tags);
    }
}

/// Energy budget shared by every script of one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnergyConfig {
    /// Units available per batch.
    pub budget: u64,

    /// VM instructions per unit.
    pub step: u32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            budget: 100_000,
            step: 100,
        }
    }
}

impl EnergyConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.budget != default.budget {
            self.budget = other.budget;
        }
        if other.step != default.step {
            self.step = other.step;
        }
    }
}

/// Dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum nesting of shouts inside scripts.
    pub max_depth: usize,

    /// Sort whispered targets by id. `false` keeps the caller's order.
    pub default_sort_bot_ids: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            default_sort_bot_ids: true,
        }
    }
}

impl DispatchConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.max_depth != default.max_depth {
            self.max_depth = other.max_depth;
        }
        if other.default_sort_bot_ids != default.default_sort_bot_ids {
            self.default_sort_bot_ids = other.default_sort_bot_ids;
        }
    }
}

/// Tag names with runtime meaning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TagNamesConfig {
    /// Holds the id of the bot that created this one.
    pub creator: String,

    /// `false` protects a bot (and its subtree) from destruction.
    pub destroyable: String,

    /// `false` stops a bot from running listeners.
    pub listening: String,
}

impl Default for TagNamesConfig {
    fn default() -> Self {
        Self {
            creator: "creator".into(),
            destroyable: "destroyable".into(),
            listening: "listening".into(),
        }
    }
}

impl TagNamesConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.creator != default.creator {
            self.creator = other.creator.clone();
        }
        if other.destroyable != default.destroyable {
            self.destroyable = other.destroyable.clone();
        }
        if other.listening != default.listening {
            self.listening = other.listening.clone();
        }
    }
}
