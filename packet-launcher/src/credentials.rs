//! Packet credential lookup.
//!
//! Credentials live in a secret with a well-known name in the namespace of
//! the device being reconciled.

use thiserror::Error;

use crate::registry::{Registry, RegistryError};

/// Default name of the credentials secret.
pub const DEFAULT_SECRET_NAME: &str = "packet-secret";

/// Key in the secret holding the API key.
pub const SECRET_KEY_API_KEY: &str = "apiKey";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} doesn't contain a key {key}")]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("get secret: {0}")]
    Registry(#[from] RegistryError),
}

impl CredentialsError {
    /// Missing secrets and keys need an operator; registry errors may pass.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Registry(_))
    }
}

/// Resolved Packet credentials.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

// Keep the key out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Looks up the API key for devices in `namespace`.
pub async fn resolve(
    registry: &dyn Registry,
    namespace: &str,
    secret_name: &str,
) -> Result<Credentials, CredentialsError> {
    let secret = registry
        .get_secret(namespace, secret_name)
        .await?
        .ok_or_else(|| CredentialsError::SecretNotFound {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
        })?;

    let api_key = secret
        .data
        .get(SECRET_KEY_API_KEY)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| CredentialsError::MissingKey {
            namespace: secret.namespace.clone(),
            name: secret.name.clone(),
            key: SECRET_KEY_API_KEY.to_string(),
        })?;

    Ok(Credentials {
        api_key: api_key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Secret;
    use crate::registry::MemoryRegistry;

    #[tokio::test]
    async fn test_resolve_api_key() {
        let registry = MemoryRegistry::new();
        registry
            .put_secret(
                Secret::new("default", DEFAULT_SECRET_NAME).with_entry(SECRET_KEY_API_KEY, "k1"),
            )
            .await;

        let creds = resolve(&registry, "default", DEFAULT_SECRET_NAME)
            .await
            .unwrap();
        assert_eq!(creds.api_key, "k1");
        assert!(!format!("{:?}", creds).contains("k1"));
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let registry = MemoryRegistry::new();
        let err = resolve(&registry, "default", DEFAULT_SECRET_NAME)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::SecretNotFound { .. }));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let registry = MemoryRegistry::new();
        registry
            .put_secret(Secret::new("default", DEFAULT_SECRET_NAME).with_entry("token", "k1"))
            .await;
        let err = resolve(&registry, "default", DEFAULT_SECRET_NAME)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::MissingKey { .. }));
        assert!(err.is_configuration());
        assert!(err.to_string().contains("apiKey"));
    }

    #[tokio::test]
    async fn test_secret_in_other_namespace_is_ignored() {
        let registry = MemoryRegistry::new();
        registry
            .put_secret(
                Secret::new("other", DEFAULT_SECRET_NAME).with_entry(SECRET_KEY_API_KEY, "k1"),
            )
            .await;
        assert!(resolve(&registry, "default", DEFAULT_SECRET_NAME)
            .await
            .is_err());
    }
}
