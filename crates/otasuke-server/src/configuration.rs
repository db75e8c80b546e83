use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use otasuke::credentials::{CredentialsError, KeyringStore, SecretStore, SecretsFile};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
    }
}

/// Where hosted secrets are read from before falling back to the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    File,
    Keyring,
    None,
}

#[derive(Debug, Deserialize)]
pub struct SecretsSettings {
    #[serde(default = "default_backend")]
    pub backend: SecretsBackend,
    #[serde(default = "default_secrets_path")]
    pub path: PathBuf,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_secrets_path(),
        }
    }
}

impl SecretsSettings {
    /// Open the configured store; a missing secrets file means no store
    pub fn open_store(&self) -> Result<Option<Box<dyn SecretStore>>, CredentialsError> {
        match self.backend {
            SecretsBackend::File => Ok(SecretsFile::load(&self.path)?
                .map(|file| Box::new(file) as Box<dyn SecretStore>)),
            SecretsBackend::Keyring => Ok(Some(Box::new(KeyringStore::default()))),
            SecretsBackend::None => Ok(None),
        }
    }
}

/// Limits on the in-memory browser sessions
#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions unused for this long are dropped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub secrets: SecretsSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("secrets.backend", "file")?
            .set_default("secrets.path", "secrets.toml")?
            .set_default("sessions.max_sessions", default_max_sessions() as u64)?
            .set_default("sessions.idle_timeout_secs", default_idle_timeout_secs())?
            .set_default("sessions.sweep_interval_secs", default_sweep_interval_secs())?
            .add_source(
                Environment::with_prefix("OTASUKE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `path`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8501
}

fn default_max_sessions() -> usize {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_backend() -> SecretsBackend {
    SecretsBackend::File
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from("secrets.toml")
}
