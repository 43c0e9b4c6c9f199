use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SeshError};
use crate::settings::{ExecutionSettings, GlobalSkillSettings};

/// Top-level configuration for the Sesh execution engine.
///
/// Loaded from `~/.sesh/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeshConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub skills: GlobalSkillSettings,
}

impl SeshConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SeshConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SeshError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the audit database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.sesh/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SeshConfig::default();
        assert_eq!(config.general.data_dir, "~/.sesh/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.execution.default_mode, ExecutionMode::Assisted);
        assert!(config.execution.stop_on_error);
        assert!(config.skills.default_enabled_skill_ids.contains("file_read"));
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[execution]
default_mode = "autonomous"
always_confirm_dangerous = false
stop_on_error = false
max_batch_size = 10

[skills]
default_enabled_skill_ids = ["file_read", "file_write"]
require_confirmation_skill_ids = []
"#;
        let file = create_temp_config(content);
        let config = SeshConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.execution.default_mode, ExecutionMode::Autonomous);
        assert!(!config.execution.always_confirm_dangerous);
        assert!(!config.execution.stop_on_error);
        assert_eq!(config.execution.max_batch_size, 10);
        // Unspecified execution fields keep their defaults.
        assert!(config.execution.always_confirm_git_operations);
        assert_eq!(config.skills.default_enabled_skill_ids.len(), 2);
        assert!(config.skills.require_confirmation_skill_ids.is_empty());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = SeshConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.data_dir, "~/.sesh/data");
        assert_eq!(config.execution.max_batch_size, 50);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SeshConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.sesh/data");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = SeshConfig::load(file.path());
        assert!(matches!(result, Err(SeshError::Config(_))));
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = SeshConfig::default();
        config.execution.default_mode = ExecutionMode::Autonomous;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = SeshConfig::load(&path).unwrap();
        assert_eq!(reloaded.execution, config.execution);
        assert_eq!(reloaded.skills, config.skills);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = SeshConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.execution, ExecutionSettings::default());
        assert_eq!(config.skills, GlobalSkillSettings::default());
    }
}
