//! Minimal AWS plumbing: credential handles, SigV4 request signing and the
//! binary event-stream framing used by streaming Bedrock responses.
pub mod event_stream;
pub mod session;
pub mod sigv4;

use std::path::PathBuf;
use thiserror::Error;

pub use session::{AwsCredentials, AwsSession, CredentialSource};

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("No AWS credentials found in the environment or the shared credentials file")]
    NoCredentials,

    #[error("Failed to read shared credentials file {}: {message}", path.display())]
    CredentialsFile { path: PathBuf, message: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed event stream frame: {0}")]
    EventStream(String),
}
