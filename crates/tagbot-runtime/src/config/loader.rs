//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Project config (`<root>/tagbot.toml`)
//! 3. Explicit config file
//! 4. Environment variables (`TAGBOT_*`)
//!
//! Each layer overrides the previous.

use super::{ConfigError, RuntimeConfig, PROJECT_CONFIG_FILE};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Helper macro for parsing numeric environment variables.
macro_rules! parse_env_num {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            $field = parse_num(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected unsigned integer"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use tagbot_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_project_root("/path/to/project")
///     .skip_env_vars()
///     .load()?;
/// # Ok::<(), tagbot_runtime::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Project root directory.
    project_root: Option<PathBuf>,

    /// Explicit config file; must exist when set.
    file: Option<PathBuf>,

    /// Skip environment variable loading.
    skip_env: bool,
}

impl ConfigLoader {
    /// Creates a new loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the project root directory.
    ///
    /// Project config is loaded from `<project_root>/tagbot.toml` if present.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    /// Sets an explicit config file, layered over the project config.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be
    /// parsed, if the explicit file is missing, or if an environment
    /// variable holds an invalid value. A missing project file is
    /// silently ignored.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let mut config = RuntimeConfig::default();

        // Layer 1: Project config
        if let Some(ref project_root) = self.project_root {
            let path = project_root.join(PROJECT_CONFIG_FILE);
            if let Some(project_config) = load_file(&path)? {
                debug!(path = %path.display(), "Loaded project config");
                config.merge(&project_config);
            }
        }

        // Layer 2: Explicit file
        if let Some(ref path) = self.file {
            let explicit = load_file(path)?.ok_or_else(|| ConfigError::NotFound(path.clone()))?;
            debug!(path = %path.display(), "Loaded config file");
            config.merge(&explicit);
        }

        // Layer 3: Environment variables
        if !self.skip_env {
            apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        }

        Ok(config)
    }
}

/// Loads a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<RuntimeConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    let config =
        RuntimeConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;

    Ok(Some(config))
}

/// Applies `TAGBOT_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for values that do not parse.
pub(crate) fn apply_env_overrides<F>(
    config: &mut RuntimeConfig,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_env_num!(lookup, config.energy.budget, "TAGBOT_ENERGY");
    parse_env_num!(lookup, config.energy.step, "TAGBOT_ENERGY_STEP");
    parse_env_num!(lookup, config.dispatch.max_depth, "TAGBOT_MAX_DEPTH");
    Ok(())
}

fn parse_num<T: FromStr>(s: &str) -> Option<T> {
    s.trim().replace('_', "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new().skip_env_vars().load().unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn load_project_config() {
        let project = TempDir::new().unwrap();
        create_config_file(
            project.path(),
            PROJECT_CONFIG_FILE,
            r#"
[energy]
budget = 2000
"#,
        );

        let config = ConfigLoader::new()
            .with_project_root(project.path())
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config.energy.budget, 2000);
        assert_eq!(config.energy.step, 100);
    }

    #[test]
    fn explicit_file_overrides_project() {
        let project = TempDir::new().unwrap();
        create_config_file(
            project.path(),
            PROJECT_CONFIG_FILE,
            r#"
[energy]
budget = 2000

[dispatch]
max_depth = 10
"#,
        );
        let explicit = create_config_file(
            project.path(),
            "other.toml",
            r#"
[dispatch]
max_depth = 20
"#,
        );

        let config = ConfigLoader::new()
            .with_project_root(project.path())
            .with_file(&explicit)
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config.energy.budget, 2000);
        assert_eq!(config.dispatch.max_depth, 20);
    }

    #[test]
    fn missing_project_file_ok() {
        let config = ConfigLoader::new()
            .with_project_root("/nonexistent/project")
            .skip_env_vars()
            .load()
            .unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn missing_explicit_file_errors() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/tagbot.toml")
            .skip_env_vars()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let dir = TempDir::new().unwrap();
        let path = create_config_file(dir.path(), "bad.toml", "[energy\nbudget = 1");

        let err = ConfigLoader::new()
            .with_file(&path)
            .skip_env_vars()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("TAGBOT_ENERGY", "1_000"),
            ("TAGBOT_ENERGY_STEP", " 7 "),
            ("TAGBOT_MAX_DEPTH", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.energy.budget, 1000);
        assert_eq!(config.energy.step, 7);
        assert_eq!(config.dispatch.max_depth, 3);
    }

    #[test]
    fn env_invalid_value_errors() {
        let mut config = RuntimeConfig::default();
        let err = apply_env_overrides(&mut config, |name| {
            (name == "TAGBOT_MAX_DEPTH").then(|| "deep".to_string())
        })
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "TAGBOT_MAX_DEPTH"));
    }

    #[test]
    fn parse_num_values() {
        assert_eq!(parse_num::<u64>("42"), Some(42));
        assert_eq!(parse_num::<u64>("100_000"), Some(100_000));
        assert_eq!(parse_num::<u64>("-1"), None);
        assert_eq!(parse_num::<u32>("abc"), None);
    }
}
