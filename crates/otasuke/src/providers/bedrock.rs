//! Amazon Bedrock provider using the ConverseStream API.
//!
//! Requests are SigV4-signed with the session's credentials; the response
//! body is an AWS event stream whose frames are surfaced as JSON events.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::base::{EventStream, Provider};
use crate::aws::event_stream::EventStreamDecoder;
use crate::aws::{AwsError, AwsSession};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const BEDROCK_SIGNING_NAME: &str = "bedrock";

#[derive(Debug, Clone)]
pub struct BedrockProviderConfig {
    pub model: String,
    /// Overrides the regional runtime endpoint
    pub endpoint: Option<String>,
}

impl BedrockProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            endpoint: None,
        }
    }
}

pub struct BedrockProvider {
    client: Client,
    session: AwsSession,
    config: BedrockProviderConfig,
}

impl BedrockProvider {
    pub fn new(session: AwsSession, config: BedrockProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        tracing::debug!(
            provider = "bedrock",
            region = %session.region(),
            model = %config.model,
            "Creating Bedrock provider"
        );
        Ok(Self {
            client,
            session,
            config,
        })
    }

    fn base_url(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.session.region()),
        }
    }

    fn stream_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/model/{}/converse-stream",
            self.base_url(),
            urlencoding::encode(&self.config.model)
        );
        Url::parse(&raw).map_err(|e| AwsError::InvalidUrl(format!("{}: {}", raw, e)).into())
    }

    pub fn request_body(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Value {
        let mut body = json!({ "messages": messages });

        if !system.is_empty() {
            body["system"] = json!([{ "text": system }]);
        }

        if !tools.is_empty() {
            let specs: Vec<Value> = tools.iter().map(Tool::to_converse_spec).collect();
            body["toolConfig"] = json!({ "tools": specs });
        }

        body
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    async fn converse_stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<EventStream> {
        let url = self.stream_url()?;
        let body = serde_json::to_vec(&self.request_body(system, messages, tools))?;

        tracing::debug!(
            provider = "bedrock",
            model = %self.config.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Starting Bedrock ConverseStream request"
        );

        let response = self
            .session
            .signed_post(&self.client, url, BEDROCK_SIGNING_NAME, body)?
            .header("accept", "application/vnd.amazon.eventstream")
            .send()
            .await
            .context("Failed to send request to Bedrock")?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .context("Failed to read Bedrock error response")?;
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| text.chars().take(500).collect());
            return Err(anyhow!("Bedrock API error ({}): {}", status, message));
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut decoder = EventStreamDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.context("Failed to read Bedrock stream")?;
                decoder.push(&chunk);
                while let Some(frame) = decoder.next_frame()? {
                    yield frame.into_event()?;
                }
            }
            if decoder.pending() > 0 {
                Err::<(), _>(AwsError::EventStream(format!(
                    "stream ended inside a frame ({} bytes pending)",
                    decoder.pending()
                )))?;
            }
        }))
    }
}
