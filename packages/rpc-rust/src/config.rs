//! Constructor-level configuration shared by [`Client`](crate::Client) and
//! [`Server`](crate::Server).

use jobwire_core::{CallOptions, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;

/// Configuration for an RPC client or server.
///
/// Deserializes from camelCase JSON:
///
/// ```json
/// { "engineOptions": { "prefix": "bq" },
///   "defaultCallOptions": { "timeout": 5000 },
///   "loggerOptions": { "level": "warn" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcConfig {
    /// Passed verbatim to the queue engine when a queue is created.
    pub engine_options: Map<String, Value>,
    /// Applied to calls that do not carry their own options.
    pub default_call_options: CallOptions,
    pub logger_options: LoggerOptions,
}

impl RpcConfig {
    /// Build a configuration from an untyped JSON value.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` if `value` is not an object or a recognized field has
    /// the wrong shape.
    pub fn from_json(value: Value) -> Result<Self, RpcError> {
        if !value.is_object() {
            return Err(RpcError::InvalidOptions(format!(
                "configuration must be an object, got {value}"
            )));
        }
        serde_json::from_value(value).map_err(|e| RpcError::InvalidOptions(e.to_string()))
    }
}

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Options for the logging collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerOptions {
    /// `trace`, `debug`, `info`, `warn`, `error`, `fatal`, `silent`, or `off`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggerOptions {
    #[must_use]
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Parse the configured level.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` for an unrecognized level name.
    pub fn level_filter(&self) -> Result<LevelFilter, RpcError> {
        match self.level.to_ascii_lowercase().as_str() {
            "fatal" => Ok(LevelFilter::ERROR),
            "silent" => Ok(LevelFilter::OFF),
            other => other
                .parse::<LevelFilter>()
                .map_err(|_| RpcError::InvalidOptions(format!("unknown log level {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_to_error_level() {
        let config = RpcConfig::default();
        assert_eq!(
            config.logger_options.level_filter().unwrap(),
            LevelFilter::ERROR
        );
        assert!(config.engine_options.is_empty());
        assert!(config.default_call_options.is_empty());
    }

    #[test]
    fn parses_camel_case_json() {
        let config = RpcConfig::from_json(json!({
            "engineOptions": { "prefix": "unit" },
            "defaultCallOptions": { "timeout": 250, "priority": "high" },
            "loggerOptions": { "level": "info", "format": "json" },
        }))
        .unwrap();

        assert_eq!(config.engine_options["prefix"], "unit");
        assert_eq!(config.default_call_options.get("timeout"), Some(&json!(250)));
        assert_eq!(config.logger_options.format, LogFormat::Json);
        assert_eq!(
            config.logger_options.level_filter().unwrap(),
            LevelFilter::INFO
        );
    }

    #[test]
    fn rejects_non_object_config() {
        let err = RpcConfig::from_json(json!("bq")).unwrap_err();
        assert!(matches!(err, RpcError::InvalidOptions(_)));

        let err = RpcConfig::from_json(json!({ "engineOptions": [1, 2] })).unwrap_err();
        assert!(matches!(err, RpcError::InvalidOptions(_)));
    }

    #[test]
    fn maps_pino_style_levels() {
        assert_eq!(
            LoggerOptions::with_level("fatal").level_filter().unwrap(),
            LevelFilter::ERROR
        );
        assert_eq!(
            LoggerOptions::with_level("silent").level_filter().unwrap(),
            LevelFilter::OFF
        );
        assert_eq!(
            LoggerOptions::with_level("WARN").level_filter().unwrap(),
            LevelFilter::WARN
        );
        assert!(LoggerOptions::with_level("loud").level_filter().is_err());
    }
}
