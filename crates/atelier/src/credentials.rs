//! Credential provider seam.
//!
//! The orchestrator never handles keys itself. It asks the provider whether a
//! usable credential exists and, when the service rejects the current one,
//! asks it to let the user pick another.

use std::sync::RwLock;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::secrets::{Result, SecretSource};

/// Host capability for credential selection.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn has_active_credential(&self) -> bool;

    /// Suspends until the user has picked or confirmed a credential.
    async fn prompt_credential_selection(&self);
}

/// Credential held in process memory, resolved from configuration.
///
/// There is no interactive host to prompt, so selection only logs what the
/// user has to do and marks the key as rejected.
pub struct StaticCredentials {
    key: Option<SecretString>,
    rejected: RwLock<bool>,
}

impl StaticCredentials {
    pub fn new(key: Option<SecretString>) -> Self {
        Self {
            key,
            rejected: RwLock::new(false),
        }
    }

    /// Resolves the key from its configured sources. An unconfigured source
    /// gives a provider without a credential.
    pub fn from_source(source: &SecretSource<'_>) -> Result<Self> {
        Ok(Self::new(source.resolve_optional()?))
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.key.as_ref()
    }

    fn is_rejected(&self) -> bool {
        match self.rejected.read() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn has_active_credential(&self) -> bool {
        let present = self
            .key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty());
        present && !self.is_rejected()
    }

    async fn prompt_credential_selection(&self) {
        match self.rejected.write() {
            Ok(mut flag) => *flag = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        log::error!(
            "The generation service rejected the configured API key. \
             Update apiKey, apiKeyFile or the key environment variable and restart."
        );
    }
}
