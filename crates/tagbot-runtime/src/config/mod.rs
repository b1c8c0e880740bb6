//! Runtime configuration with layered loading.
//!
//! # Layers
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌──────────────────────────────────────────────┐
//! │  1. Environment Variables (TAGBOT_*)         │
//! ├──────────────────────────────────────────────┤
//! │  2. Explicit file (--config / with_file)     │
//! ├──────────────────────────────────────────────┤
//! │  3. Project file (<root>/tagbot.toml)        │
//! ├──────────────────────────────────────────────┤
//! │  4. Default values (compile-time)            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `TAGBOT_ENERGY` | `energy.budget` | u64 |
//! | `TAGBOT_ENERGY_STEP` | `energy.step` | u32 |
//! | `TAGBOT_MAX_DEPTH` | `dispatch.max_depth` | usize |
//!
//! # Example Configuration
//!
//! ```toml
//! [energy]
//! budget = 100000
//! step = 100
//!
//! [dispatch]
//! max_depth = 64
//! default_sort_bot_ids = true
//!
//! [tags]
//! creator = "creator"
//! destroyable = "destroyable"
//! listening = "listening"
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{DispatchConfig, EnergyConfig, RuntimeConfig, TagNamesConfig};

/// Project config file name, looked up directly under the project root.
pub const PROJECT_CONFIG_FILE: &str = "tagbot.toml";
