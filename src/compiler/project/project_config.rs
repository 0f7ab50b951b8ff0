//! Optional per-project metadata, read from `horse_project.toml` at the
//! project root. A missing file is not an error; a malformed one is.

use crate::settings::PROJECT_CONFIG_FILE_NAME;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
}

fn default_version() -> String {
    "0.1.0".to_owned()
}

impl ProjectConfig {
    /// Load the config next to the project root, or defaults when the
    /// file does not exist.
    pub fn load(project_root: &Path) -> Result<ProjectConfig, String> {
        let config_path = project_root.join(PROJECT_CONFIG_FILE_NAME);
        if !config_path.is_file() {
            return Ok(ProjectConfig::default());
        }
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("cannot read {}: {e}", config_path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("malformed {}: {e}", config_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.version, "0.1.0");
        assert!(config.project_name.is_empty());
    }

    #[test]
    fn toml_fields_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE_NAME),
            "project_name = \"demo\"\nversion = \"2.4.0\"\nlicense = \"BSD-2-Clause\"\n",
        )
        .unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.version, "2.4.0");
        assert_eq!(config.license, "BSD-2-Clause");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE_NAME), "version = [").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }
}
