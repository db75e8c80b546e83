use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::message::Message;
use crate::models::tool::Tool;

/// Raw model events, each shaped `{eventType: payload}` as the Converse stream emits them
pub type EventStream = BoxStream<'static, Result<Value>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
        total_tokens: Option<i64>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Read the usage block of a `metadata` event payload
    pub fn from_metadata(metadata: &Value) -> Self {
        let usage = &metadata["usage"];
        Self::new(
            usage["inputTokens"].as_i64(),
            usage["outputTokens"].as_i64(),
            usage["totalTokens"].as_i64(),
        )
    }
}

/// A hosted model that streams its reply
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start one streamed completion over the conversation so far
    async fn converse_stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<EventStream>;
}
