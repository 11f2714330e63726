//! Configuration management.
//!
//! Configuration is an explicit value threaded into each component's
//! constructor; there is no ambient global lookup anywhere in the crate.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for curator.
#[derive(Debug, Clone)]
pub struct CuratorConfig {
    /// Path to the `SQLite` rule repository.
    pub db_path: PathBuf,
    /// Path to the vocabulary YAML file.
    pub vocab_path: PathBuf,
    /// Data directory for audit logs.
    pub data_dir: PathBuf,
    /// Oracle invocation settings.
    pub oracle: OracleConfig,
    /// Optimizer and convergence settings.
    pub optimizer: OptimizerConfig,
}

/// Classification oracle invocation settings.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Command to invoke (resolved via `PATH` unless absolute).
    pub command: String,
    /// Hard timeout per invocation, in seconds.
    ///
    /// Tagging classification defaults to 30s; the slower knowledge-type
    /// classification used elsewhere configures a larger value here
    /// rather than baking a constant into the client.
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Optimizer thresholds and convergence limits.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Bounded worker pool width for one pass.
    pub max_workers: usize,
    /// Ceiling on convergence passes.
    pub max_passes: u32,
    /// Minimum oracle confidence for auto-approval.
    pub confidence_threshold: f64,
    /// Minimum tag coherence for auto-approval.
    pub coherence_threshold: f64,
    /// Override for the oracle-call budget. When `None` the budget is
    /// `max(500, corpus_size / 2)` calls.
    pub budget_override: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            max_passes: 10,
            confidence_threshold: 0.70,
            coherence_threshold: 0.30,
            budget_override: None,
        }
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/rules.db"),
            vocab_path: PathBuf::from("config/tag-vocabulary.yaml"),
            data_dir: PathBuf::from("data"),
            oracle: OracleConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Rule repository path.
    pub db_path: Option<String>,
    /// Vocabulary file path.
    pub vocab_path: Option<String>,
    /// Data directory.
    pub data_dir: Option<String>,
    /// Oracle section.
    pub oracle: Option<ConfigFileOracle>,
    /// Optimizer section.
    pub optimizer: Option<ConfigFileOptimizer>,
}

/// Oracle section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileOracle {
    /// Command name or path.
    pub command: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Optimizer section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileOptimizer {
    /// Worker pool width.
    pub max_workers: Option<usize>,
    /// Pass ceiling.
    pub max_passes: Option<u32>,
    /// Auto-approval confidence threshold.
    pub confidence_threshold: Option<f64>,
    /// Auto-approval coherence threshold.
    pub coherence_threshold: Option<f64>,
    /// Oracle-call budget override.
    pub budget: Option<u64>,
}

impl CuratorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| {
            crate::Error::Config(format!("cannot parse {}: {e}", path.display()))
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir first, then falls back to
    /// XDG-style `~/.config/curator/` for Unix compatibility. Returns
    /// defaults if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("curator").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config;
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("curator")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `CuratorConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(db_path) = file.db_path {
            config.db_path = PathBuf::from(db_path);
        }
        if let Some(vocab_path) = file.vocab_path {
            config.vocab_path = PathBuf::from(vocab_path);
        }
        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(oracle) = file.oracle {
            if let Some(command) = oracle.command {
                config.oracle.command = command;
            }
            if let Some(timeout_secs) = oracle.timeout_secs {
                config.oracle.timeout_secs = timeout_secs;
            }
        }
        if let Some(optimizer) = file.optimizer {
            if let Some(v) = optimizer.max_workers {
                config.optimizer.max_workers = v;
            }
            if let Some(v) = optimizer.max_passes {
                config.optimizer.max_passes = v;
            }
            if let Some(v) = optimizer.confidence_threshold {
                config.optimizer.confidence_threshold = v;
            }
            if let Some(v) = optimizer.coherence_threshold {
                config.optimizer.coherence_threshold = v;
            }
            config.optimizer.budget_override = optimizer.budget;
        }

        config
    }

    /// Path of the scoring warnings audit log.
    #[must_use]
    pub fn scoring_audit_path(&self) -> PathBuf {
        self.data_dir.join("score_warnings.log")
    }

    /// Path of the optimization warnings audit log.
    #[must_use]
    pub fn optimization_audit_path(&self) -> PathBuf {
        self.data_dir.join("tag_optimization_warnings.log")
    }

    /// Sets the rule repository path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Sets the vocabulary file path.
    #[must_use]
    pub fn with_vocab_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.vocab_path = path.into();
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CuratorConfig::default();
        assert_eq!(config.oracle.command, "claude");
        assert_eq!(config.oracle.timeout_secs, 30);
        assert_eq!(config.optimizer.max_workers, 3);
        assert_eq!(config.optimizer.max_passes, 10);
        assert!((config.optimizer.confidence_threshold - 0.70).abs() < f64::EPSILON);
        assert!((config.optimizer.coherence_threshold - 0.30).abs() < f64::EPSILON);
        assert!(config.optimizer.budget_override.is_none());
    }

    #[test]
    fn test_from_config_file_overrides() {
        let file: ConfigFile = toml::from_str(
            r#"
db_path = "/srv/rules.db"
vocab_path = "/srv/tag-vocabulary.yaml"

[oracle]
command = "claude-stub"
timeout_secs = 120

[optimizer]
max_workers = 5
budget = 1000
"#,
        )
        .unwrap();

        let config = CuratorConfig::from_config_file(file);
        assert_eq!(config.db_path, PathBuf::from("/srv/rules.db"));
        assert_eq!(config.oracle.command, "claude-stub");
        assert_eq!(config.oracle.timeout_secs, 120);
        assert_eq!(config.optimizer.max_workers, 5);
        assert_eq!(config.optimizer.budget_override, Some(1000));
        // Untouched sections keep their defaults.
        assert_eq!(config.optimizer.max_passes, 10);
    }

    #[test]
    fn test_audit_paths_derive_from_data_dir() {
        let config = CuratorConfig::default().with_data_dir("/var/curator");
        assert_eq!(
            config.scoring_audit_path(),
            PathBuf::from("/var/curator/score_warnings.log")
        );
        assert_eq!(
            config.optimization_audit_path(),
            PathBuf::from("/var/curator/tag_optimization_warnings.log")
        );
    }
}
