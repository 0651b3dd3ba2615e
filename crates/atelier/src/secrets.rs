//! API key resolution.
//!
//! A key may be given three ways, checked in this order:
//!
//! 1. **Direct value** in the config (`apiKey`), for quick local runs
//! 2. **File** (`apiKeyFile`), for mounted secrets
//! 3. **Environment variable** (`apiKeyEnvVar`, `GEMINI_API_KEY` by default)

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No API key source configured (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read API key from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API key file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to look for a secret. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSource<'a> {
    pub direct: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    /// True when at least one source is set.
    pub fn is_configured(&self) -> bool {
        [self.direct, self.file, self.env_var]
            .into_iter()
            .any(|s| s.is_some_and(|s| !s.is_empty()))
    }

    /// Resolves the first configured source.
    ///
    /// Later sources are not consulted once an earlier one is configured,
    /// even if reading it fails.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = self.direct.filter(|v| !v.is_empty()) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = self.file.filter(|p| !p.is_empty()) {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                path: expanded.clone(),
                source: e,
            })?;
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(SecretError::EmptyFile { path: expanded });
            }
            return Ok(SecretString::from(trimmed.to_string()));
        }

        if let Some(name) = self.env_var.filter(|n| !n.is_empty()) {
            return match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }

    /// Like [`resolve`](Self::resolve), but an unconfigured source or an unset
    /// variable yields `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_wins() {
        std::env::set_var("ATELIER_TEST_KEY_1", "from-env");
        let source = SecretSource {
            direct: Some("from-config"),
            file: None,
            env_var: Some("ATELIER_TEST_KEY_1"),
        };
        assert_eq!(source.resolve().unwrap().expose_secret(), "from-config");
        std::env::remove_var("ATELIER_TEST_KEY_1");
    }

    #[test]
    #[serial]
    fn test_file_beats_env_and_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        std::env::set_var("ATELIER_TEST_KEY_2", "from-env");

        let path = file.path().to_str().unwrap();
        let source = SecretSource {
            direct: Some(""),
            file: Some(path),
            env_var: Some("ATELIER_TEST_KEY_2"),
        };
        assert_eq!(source.resolve().unwrap().expose_secret(), "from-file");
        std::env::remove_var("ATELIER_TEST_KEY_2");
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        let source = SecretSource {
            file: Some(file.path().to_str().unwrap()),
            ..Default::default()
        };
        assert!(matches!(source.resolve(), Err(SecretError::EmptyFile { .. })));
    }

    #[test]
    #[serial]
    fn test_env_fallback() {
        std::env::set_var("ATELIER_TEST_KEY_3", "from-env\n");
        let source = SecretSource {
            env_var: Some("ATELIER_TEST_KEY_3"),
            ..Default::default()
        };
        assert_eq!(source.resolve().unwrap().expose_secret(), "from-env");
        std::env::remove_var("ATELIER_TEST_KEY_3");
    }

    #[test]
    fn test_missing_sources() {
        assert!(matches!(
            SecretSource::default().resolve(),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(!SecretSource::default().is_configured());

        let unset = SecretSource {
            env_var: Some("ATELIER_DEFINITELY_UNSET_12345"),
            ..Default::default()
        };
        assert!(unset.is_configured());
        assert!(matches!(unset.resolve(), Err(SecretError::EnvVarNotSet { .. })));
        assert!(unset.resolve_optional().unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let source = SecretSource {
            file: Some("/nonexistent/atelier/key"),
            env_var: Some("PATH"),
            ..Default::default()
        };
        assert!(matches!(source.resolve(), Err(SecretError::FileReadError { .. })));
        assert!(source.resolve_optional().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/key"), "/abs/key");
        assert_eq!(expand_home("rel/key"), "rel/key");
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy().into_owned();
            assert_eq!(expand_home("~/key"), format!("{}/key", home));
            assert_eq!(expand_home("~"), home);
        }
    }
}
