use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, TapError};

/// Main configuration structure for streamtap
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Stream proxy behaviour
    #[serde(default)]
    pub stream: StreamConfig,
    /// Span finalization settings
    #[serde(default)]
    pub span: SpanConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TapError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a TOML configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Stream proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Forward chunks without accumulating or finalizing anything
    #[serde(default)]
    pub suppress_instrumentation: bool,
    /// Name of the span event emitted when the first chunk arrives
    #[serde(default = "default_first_chunk_event")]
    pub first_chunk_event: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            suppress_instrumentation: false,
            first_chunk_event: default_first_chunk_event(),
        }
    }
}

fn default_first_chunk_event() -> String {
    "First Token Stream Event".to_string()
}

/// Span finalization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SpanConfig {
    /// Attribute-count ceiling of the span sink
    #[serde(default = "default_max_attributes")]
    pub max_attributes: usize,
    /// Name used when the replay tool opens a span
    #[serde(default = "default_span_name")]
    pub name: String,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            max_attributes: default_max_attributes(),
            name: default_span_name(),
        }
    }
}

fn default_max_attributes() -> usize {
    128
}

fn default_span_name() -> String {
    "llm.stream".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.stream.suppress_instrumentation);
        assert_eq!(config.stream.first_chunk_event, "First Token Stream Event");
        assert_eq!(config.span.max_attributes, 128);
        assert_eq!(config.span.name, "llm.stream");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[stream]
suppress_instrumentation = true
first_chunk_event = "first chunk"

[span]
max_attributes = 32
name = "chat.completions"
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse TOML");

        assert!(config.stream.suppress_instrumentation);
        assert_eq!(config.stream.first_chunk_event, "first chunk");
        assert_eq!(config.span.max_attributes, 32);
        assert_eq!(config.span.name, "chat.completions");
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[span]
max_attributes = 16
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.span.max_attributes, 16);
        assert_eq!(config.span.name, "llm.stream");
        assert!(!config.stream.suppress_instrumentation);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[span]\nmax_attributes = \"many\"").unwrap_err();
        assert!(matches!(err, TapError::Config(_)));
    }
}
