//! Secret resolution for external service credentials.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError>;
}

/// Environment variable name for a secret name (`ANALYZER-KEY` → `ANALYZER_KEY`).
pub fn env_var_name(secret_name: &str) -> String {
    secret_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads secrets from environment variables.
#[derive(Clone)]
pub struct EnvSecretStore {
    lookup: Lookup,
}

impl core::fmt::Debug for EnvSecretStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EnvSecretStore").finish_non_exhaustive()
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve through an arbitrary lookup instead of the process environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Arc::new(lookup),
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError> {
        let var = env_var_name(name);
        match (self.lookup)(&var) {
            Some(value) if !value.trim().is_empty() => {
                Ok(SecretString::from(value.trim().to_string()))
            }
            _ => Err(SecretError::NotFound(name.to_string())),
        }
    }
}

/// Fixed set of secrets, for tests and the simulated stack.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError> {
        self.secrets
            .get(name)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn secret_names_map_to_env_vars() {
        assert_eq!(env_var_name("ANALYZER-KEY"), "ANALYZER_KEY");
        assert_eq!(env_var_name("db.password"), "DB_PASSWORD");
    }

    #[tokio::test]
    async fn env_store_resolves_through_lookup() {
        let store = EnvSecretStore::with_lookup(|key| {
            (key == "ANALYZER_KEY").then(|| " s3cr3t \n".to_string())
        });
        let secret = store.get_secret("ANALYZER-KEY").await.unwrap();
        assert_eq!(secret.expose_secret(), "s3cr3t");
        assert_eq!(
            store.get_secret("OTHER").await.unwrap_err(),
            SecretError::NotFound("OTHER".to_string())
        );
    }

    #[tokio::test]
    async fn static_store_returns_configured_values() {
        let store = StaticSecretStore::new().with_secret("ANALYZER-KEY", "k");
        assert_eq!(store.get_secret("ANALYZER-KEY").await.unwrap().expose_secret(), "k");
        assert!(store.get_secret("missing").await.is_err());
    }
}
