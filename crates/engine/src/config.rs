use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Crop tolerance in degrees, about 100 m.
    pub crop_degrees: f64,
    /// Crop tolerance for roaming outings, about 10 km.
    pub roaming_crop_degrees: f64,
    /// Boundaries narrower or shorter than this are roaming assignments.
    pub roaming_threshold_meters: f64,
    /// Case-insensitive folder-title substrings whose contents are not mirrored.
    pub excluded_folder_keywords: Vec<String>,
    pub clue_retry_delay_ms: u64,
    pub state_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub print_pad_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crop_degrees: 0.001,
            roaming_crop_degrees: 0.1,
            roaming_threshold_meters: 50.0,
            excluded_folder_keywords: vec!["scratch".to_string()],
            clue_retry_delay_ms: 500,
            state_dir: PathBuf::from("."),
            poll_interval_ms: 5000,
            print_pad_pct: 15.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn is_excluded_folder_title(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.excluded_folder_keywords
            .iter()
            .any(|k| !k.is_empty() && title.contains(&k.to_lowercase()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn clue_retry_delay(&self) -> Duration {
        Duration::from_millis(self.clue_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_field_practice() {
        let c = EngineConfig::default();
        assert_eq!(c.crop_degrees, 0.001);
        assert_eq!(c.roaming_crop_degrees, 0.1);
        assert_eq!(c.roaming_threshold_meters, 50.0);
        assert!(c.is_excluded_folder_title("Scratch work"));
        assert!(!c.is_excluded_folder_title("AA 101"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
            crop_degrees = 0.002
            excluded_folder_keywords = ["scratch", "training"]
            state_dir = "/var/lib/debrief"
            "#,
        )
        .unwrap();
        assert_eq!(c.crop_degrees, 0.002);
        assert_eq!(c.roaming_crop_degrees, 0.1);
        assert!(c.is_excluded_folder_title("TRAINING"));
        assert_eq!(c.state_dir, PathBuf::from("/var/lib/debrief"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("crop_degrees = \"wide\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debrief.toml");
        std::fs::write(&path, "poll_interval_ms = 250\n").unwrap();
        let c = EngineConfig::load(&path).unwrap();
        assert_eq!(c.poll_interval(), Duration::from_millis(250));
    }
}
