use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the dotted settings path `field_path`
pub fn to_env_var(field_path: &str) -> String {
    format!("OTASUKE_{}", field_path.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "OTASUKE_SERVER__PORT");
        assert_eq!(to_env_var("secrets.backend"), "OTASUKE_SECRETS__BACKEND");
        assert_eq!(to_env_var("host"), "OTASUKE_HOST");
    }

    #[test]
    fn test_missing_env_var_message() {
        let err = ConfigError::MissingEnvVar {
            env_var: to_env_var("secrets.path"),
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: OTASUKE_SECRETS__PATH"
        );
    }
}
