use std::path::Path;

use crate::config::schema::StudioConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StudioConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<StudioConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: StudioConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &StudioConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if let Err(e) = reqwest::Url::parse(&config.api.base_url) {
        return Err(ConfigError::Validation {
            message: format!("Invalid api.baseUrl '{}': {}", config.api.base_url, e),
        });
    }

    if config.polling.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "polling.intervalSecs must be at least 1".to_string(),
        });
    }

    if config.api.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "api.requestTimeoutSecs must be at least 1".to_string(),
        });
    }

    if config.jobs.event_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.eventCapacity must be at least 1".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogFormat;
    use std::time::Duration;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config, StudioConfig::default());
        assert_eq!(config.polling.settings().interval, Duration::from_secs(10));
        assert_eq!(config.polling.settings().max_consecutive_failures, None);
        assert_eq!(config.jobs.image_removal_delay(), Duration::from_millis(4000));
        assert_eq!(config.jobs.video_removal_delay(), Duration::from_millis(5000));
        assert_eq!(
            config.api.key_source().env_var,
            Some("GEMINI_API_KEY")
        );
    }

    #[test]
    fn test_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "databasePath": "/var/lib/atelier/archive.db",
            "mediaDirectory": "/var/lib/atelier/media",
            "api": {
                "baseUrl": "http://localhost:8080/v1beta",
                "apiKeyFile": "/run/secrets/gemini",
                "requestTimeoutSecs": 30
            },
            "polling": { "intervalSecs": 2, "maxConsecutiveFailures": 5 },
            "jobs": { "imageRemovalDelayMs": 0, "eventCapacity": 16 },
            "logging": { "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.resolved_database_path().unwrap(),
            Path::new("/var/lib/atelier/archive.db")
        );
        assert_eq!(
            config.media_directory.as_deref(),
            Some(Path::new("/var/lib/atelier/media"))
        );
        assert_eq!(config.api.key_source().file, Some("/run/secrets/gemini"));
        assert_eq!(config.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.polling.settings().max_consecutive_failures, Some(5));
        assert_eq!(config.jobs.image_removal_delay(), Duration::ZERO);
        assert_eq!(config.jobs.video_removal_delay_ms, 5000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workerCount": 4 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = load_config_from_str(r#"{ "version": "1.0", "polling": { "intervalSecs": 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "api": { "baseUrl": "not a url" } }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atelier.json");
        std::fs::write(&path, r#"{ "version": "1.0", "polling": { "intervalSecs": 3 } }"#)
            .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.polling.interval_secs, 3);

        let missing = load_config(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }
}
