//! inflow.toml configuration parser.
//!
//! ```toml
//! [response]
//! max_buffered_chunks = 16
//! retain_body = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InflowConfig {
    #[serde(default)]
    pub response: ResponseConfig,
}

/// Per-response buffering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Undelivered chunks held while the consumer is paused before the
    /// transport is told to stop reading.
    pub max_buffered_chunks: usize,
    /// Keep a reference to every delivered chunk so the body can still be
    /// aggregated after chunks were handed out or the stream ended.
    pub retain_body: bool,
}

impl ResponseConfig {
    pub const DEFAULT_MAX_BUFFERED_CHUNKS: usize = 16;

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_buffered_chunks > 0,
            "response.max_buffered_chunks must be at least 1"
        );
        Ok(())
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            max_buffered_chunks: Self::DEFAULT_MAX_BUFFERED_CHUNKS,
            retain_body: false,
        }
    }
}

impl InflowConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: InflowConfig = toml::from_str(content)?;
        config.response.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_uses_defaults() {
        let config = InflowConfig::from_toml_str("").unwrap();
        assert_eq!(config.response, ResponseConfig::default());
        assert_eq!(config.response.max_buffered_chunks, 16);
        assert!(!config.response.retain_body);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[response]
retain_body = true
"#;
        let config = InflowConfig::from_toml_str(toml_str).unwrap();
        assert!(config.response.retain_body);
        assert_eq!(config.response.max_buffered_chunks, 16);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let toml_str = r#"
[response]
max_buffered_chunks = 0
"#;
        let err = InflowConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("max_buffered_chunks"));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let config = InflowConfig {
            response: ResponseConfig {
                max_buffered_chunks: 4,
                retain_body: true,
            },
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflow.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = InflowConfig::from_file(&path).unwrap();
        assert_eq!(loaded.response, config.response);
    }

    #[test]
    fn test_missing_file() {
        assert!(InflowConfig::from_file(Path::new("/nonexistent/inflow.toml")).is_err());
    }
}
