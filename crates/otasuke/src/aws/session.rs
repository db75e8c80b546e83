use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use super::{sigv4, AwsError};
use crate::credentials::{
    Credentials, Environment, RealEnvironment, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY,
    AWS_SESSION_TOKEN,
};

const SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
const PROFILE: &str = "AWS_PROFILE";
const DEFAULT_PROFILE: &str = "default";

#[derive(Clone, PartialEq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<REDACTED>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Where a session gets its signing credentials from
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Keys supplied through configuration
    Explicit(AwsCredentials),
    /// Ambient discovery: environment, then the shared credentials file
    Default,
}

/// An authenticated handle for calling AWS services in one region
#[derive(Debug, Clone)]
pub struct AwsSession {
    region: String,
    source: CredentialSource,
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.is_empty())
}

impl AwsSession {
    pub fn new(region: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            region: region.into(),
            source,
        }
    }

    /// Explicit keys when both the access key id and secret are configured,
    /// ambient discovery otherwise. The region is always the configured one.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let source = match (
            non_empty(&credentials.access_key_id),
            non_empty(&credentials.secret_access_key),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => {
                CredentialSource::Explicit(AwsCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: non_empty(&credentials.session_token).cloned(),
                })
            }
            _ => CredentialSource::Default,
        };
        tracing::debug!(
            region = %credentials.region,
            explicit = matches!(source, CredentialSource::Explicit(_)),
            "Creating AWS session"
        );
        Self::new(credentials.region.clone(), source)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    pub fn explicit_credentials(&self) -> Option<&AwsCredentials> {
        match &self.source {
            CredentialSource::Explicit(credentials) => Some(credentials),
            CredentialSource::Default => None,
        }
    }

    /// The credentials to sign with right now
    pub fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        match &self.source {
            CredentialSource::Explicit(credentials) => Ok(credentials.clone()),
            CredentialSource::Default => default_chain(&RealEnvironment),
        }
    }

    /// Build a signed JSON POST for `service` at `url`
    pub fn signed_post(
        &self,
        client: &Client,
        url: Url,
        service: &str,
        body: Vec<u8>,
    ) -> Result<RequestBuilder, AwsError> {
        let credentials = self.credentials()?;
        let headers = sigv4::sign(
            "POST",
            &url,
            &body,
            &credentials,
            &self.region,
            service,
            Utc::now(),
        )?;

        let mut request = client
            .post(url)
            .header("content-type", "application/json")
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Ok(request)
    }
}

/// Ambient credential discovery
pub fn default_chain(env: &dyn Environment) -> Result<AwsCredentials, AwsError> {
    if let (Ok(access_key_id), Ok(secret_access_key)) = (
        env.get_var(AWS_ACCESS_KEY_ID),
        env.get_var(AWS_SECRET_ACCESS_KEY),
    ) {
        if !access_key_id.is_empty() && !secret_access_key.is_empty() {
            return Ok(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: env.get_var(AWS_SESSION_TOKEN).ok().filter(|t| !t.is_empty()),
            });
        }
    }

    let path = match env.get_var(SHARED_CREDENTIALS_FILE) {
        Ok(path) => PathBuf::from(path),
        Err(_) => dirs::home_dir()
            .ok_or(AwsError::NoCredentials)?
            .join(".aws")
            .join("credentials"),
    };
    if !path.exists() {
        return Err(AwsError::NoCredentials);
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| AwsError::CredentialsFile {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let profile = env
        .get_var(PROFILE)
        .unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
    let sections = parse_profiles(&raw);
    let section = sections.get(&profile).ok_or(AwsError::NoCredentials)?;

    match (
        section.get("aws_access_key_id"),
        section.get("aws_secret_access_key"),
    ) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: section.get("aws_session_token").cloned(),
        }),
        _ => Err(AwsError::NoCredentials),
    }
}

/// `[profile]` sections of `key = value` pairs
fn parse_profiles(raw: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
        } else if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}
