//! `[logger]` section: level, timestamp style and output targets.

use std::fmt;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Console line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => f.write_str("compact"),
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// How timestamps are rendered on the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimestampFormat {
    #[default]
    Rfc3339,
    Unix,
    /// `time` crate format description, e.g. `"[hour]:[minute]:[second]"`.
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// trace, debug, info, warn or error (case-insensitive). `RUST_LOG` wins.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(custom(function = "validate_timestamp_format"))]
    pub timestamp_format: TimestampFormat,

    #[validate(nested)]
    pub console: ConsoleConfig,

    #[validate(nested)]
    pub journald: JournaldConfig,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some(format!("Invalid log level: {}", level).into());
            Err(err)
        }
    }
}

fn validate_timestamp_format(format: &TimestampFormat) -> Result<(), ValidationError> {
    let TimestampFormat::Custom(description) = format else {
        return Ok(());
    };
    if description.is_empty() {
        let mut err = ValidationError::new("invalid_timestamp_format");
        err.message = Some("Custom timestamp format cannot be empty".into());
        return Err(err);
    }
    if let Err(e) = time::format_description::parse_owned::<2>(description) {
        let mut err = ValidationError::new("invalid_timestamp_format");
        err.message = Some(format!("Invalid custom timestamp format: {}", e).into());
        return Err(err);
    }
    Ok(())
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            timestamp_format: TimestampFormat::default(),
            console: ConsoleConfig::default(),
            journald: JournaldConfig::default(),
        }
    }
}

/// Console output. Always written to stderr.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: false,
            show_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// systemd journal output (Unix only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JournaldConfig {
    pub enabled: bool,

    #[validate(length(min = 1, message = "Journald identifier cannot be empty"))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoggerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.console.enabled);
        assert!(!config.journald.enabled);
        assert_eq!(config.journald.identifier, "sensor-relay");
    }

    #[test]
    fn test_level_is_case_insensitive() {
        let config = LoggerConfig {
            level: "DEBUG".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = LoggerConfig {
            level: "verbose".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_timestamp_format() {
        let ok = LoggerConfig {
            timestamp_format: TimestampFormat::Custom("[hour]:[minute]:[second]".into()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let empty = LoggerConfig {
            timestamp_format: TimestampFormat::Custom(String::new()),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let broken = LoggerConfig {
            timestamp_format: TimestampFormat::Custom("[hour".into()),
            ..Default::default()
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_parse_console_section() {
        let config: LoggerConfig = toml::from_str(
            r#"
            level = "warn"

            [console]
            format = "json"
            ansi_colors = false
            "#,
        )
        .unwrap();
        assert_eq!(config.level, "warn");
        assert_eq!(config.console.format, LogFormat::Json);
        assert!(!config.console.ansi_colors);
        assert!(config.console.enabled);
    }
}
