//! Editor configuration

use crate::error::{EditorError, EditorResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TRANSFORM_PASSES: usize = 1000;

/// Serializable editor settings
///
/// Node kinds and replacements are code, not data, and are registered
/// through `EditorBuilder` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Label used in log output
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Initial editable flag
    #[serde(default = "default_editable")]
    pub editable: bool,

    /// Transform passes allowed per update before the update is aborted
    #[serde(default = "default_max_transform_passes")]
    pub max_transform_passes: usize,
}

fn default_namespace() -> String {
    "folio".to_string()
}

fn default_editable() -> bool {
    true
}

fn default_max_transform_passes() -> usize {
    DEFAULT_MAX_TRANSFORM_PASSES
}

impl EditorConfig {
    /// Parse a JSON config; absent fields take their defaults
    pub fn from_json(json: &str) -> EditorResult<Self> {
        let config: EditorConfig =
            serde_json::from_str(json).map_err(|e| EditorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EditorResult<()> {
        if self.max_transform_passes == 0 {
            return Err(EditorError::Config(
                "maxTransformPasses must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            editable: default_editable(),
            max_transform_passes: default_max_transform_passes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "namespace": "notes",
            "editable": false,
            "maxTransformPasses": 50
        }"#;

        let config = EditorConfig::from_json(json).unwrap();
        assert_eq!(config.namespace, "notes");
        assert!(!config.editable);
        assert_eq!(config.max_transform_passes, 50);
    }

    #[test]
    fn test_default_config() {
        let config = EditorConfig::from_json("{}").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.namespace, "folio");
        assert!(config.editable);
        assert_eq!(config.max_transform_passes, 1000);
    }

    #[test]
    fn test_zero_passes_rejected() {
        let err = EditorConfig::from_json(r#"{"maxTransformPasses": 0}"#).unwrap_err();
        assert!(matches!(err, EditorError::Config(_)));
    }
}
