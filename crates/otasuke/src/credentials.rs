//! Resolution of named configuration values.
//!
//! A value is looked up in the hosted secret store first (when one is
//! configured and holds the key), then in the process environment, then the
//! caller-supplied default. Values are not validated; a bad credential only
//! shows up when a downstream call fails.
use keyring::Entry;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
#[cfg(test)]
use mockall::automock;

const KEYRING_SERVICE: &str = "otasuke";

pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const KNOWLEDGE_BASE_ID: &str = "KNOWLEDGE_BASE_ID";
pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";

pub const DEFAULT_REGION: &str = "us-west-2";

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Failed to access keyring: {0}")]
    KeyringAccess(String),

    #[error("Failed to read secrets file {}: {message}", path.display())]
    SecretsFile { path: PathBuf, message: String },
}

impl From<keyring::Error> for CredentialsError {
    fn from(err: keyring::Error) -> Self {
        CredentialsError::KeyringAccess(err.to_string())
    }
}

/// A hosted secret store holding configuration values by key
#[cfg_attr(test, automock)]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the store does not hold the key
    fn get(&self, key: &str) -> Result<Option<String>, CredentialsError>;
}

#[cfg_attr(test, automock)]
pub trait Environment: Send + Sync {
    fn get_var(&self, key: &str) -> Result<String, env::VarError>;
}

pub struct RealEnvironment;

impl Environment for RealEnvironment {
    fn get_var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

/// Secrets injected by the hosting platform as a flat TOML document
#[derive(Debug, Default)]
pub struct SecretsFile {
    values: HashMap<String, String>,
}

impl SecretsFile {
    /// Load the file at `path`. A missing file means no store is available.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, CredentialsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| CredentialsError::SecretsFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&raw)
            .map(Some)
            .map_err(|message| CredentialsError::SecretsFile {
                path: path.to_path_buf(),
                message,
            })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let table: toml::Table = toml::from_str(raw).map_err(|e| e.to_string())?;
        let values = table
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    // nested tables are sections, not single values
                    _ => return None,
                };
                Some((key, value))
            })
            .collect();
        Ok(Self { values })
    }
}

impl SecretStore for SecretsFile {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialsError> {
        Ok(self.values.get(key).cloned())
    }
}

/// The operating system keyring
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialsError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct CredentialResolver {
    store: Option<Box<dyn SecretStore>>,
    env: Box<dyn Environment>,
}

impl CredentialResolver {
    pub fn new(store: Option<Box<dyn SecretStore>>, env: Box<dyn Environment>) -> Self {
        Self { store, env }
    }

    /// Resolver over the real process environment
    pub fn with_store(store: Option<Box<dyn SecretStore>>) -> Self {
        Self::new(store, Box::new(RealEnvironment))
    }

    pub fn resolve(&self, key: &str, default: Option<&str>) -> Option<String> {
        if let Some(store) = &self.store {
            match store.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, error = %e, "secret store lookup failed, falling back to environment");
                }
            }
        }

        match self.env.get_var(key) {
            Ok(value) => Some(value),
            Err(_) => default.map(str::to_string),
        }
    }
}

/// Every configuration value the chatbot needs, resolved once at start-up
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub knowledge_base_id: Option<String>,
    pub tavily_api_key: Option<String>,
}

impl Credentials {
    pub fn resolve(resolver: &CredentialResolver) -> Self {
        Self {
            region: resolver
                .resolve(AWS_REGION, Some(DEFAULT_REGION))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: resolver.resolve(AWS_ACCESS_KEY_ID, None),
            secret_access_key: resolver.resolve(AWS_SECRET_ACCESS_KEY, None),
            session_token: resolver.resolve(AWS_SESSION_TOKEN, None),
            knowledge_base_id: resolver.resolve(KNOWLEDGE_BASE_ID, None),
            tavily_api_key: resolver.resolve(TAVILY_API_KEY, None),
        }
    }
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(_) => "<REDACTED>",
        None => "<unset>",
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("knowledge_base_id", &self.knowledge_base_id)
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .finish()
    }
}
