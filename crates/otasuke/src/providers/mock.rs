use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use super::base::{EventStream, Provider};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One scripted stream item; `Err` strings become stream errors
pub type ScriptedEvent = std::result::Result<Value, String>;

/// A mock provider that replays pre-configured event streams for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Vec<ScriptedEvent>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Vec<ScriptedEvent>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Conversations the provider was called with, in order
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.requests.clone()
    }

    pub fn text_reply(parts: &[&str]) -> Vec<ScriptedEvent> {
        let mut events = vec![Ok(json!({"messageStart": {"role": "assistant"}}))];
        for part in parts {
            events.push(Ok(json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": part}}})));
        }
        events.push(Ok(json!({"contentBlockStop": {"contentBlockIndex": 0}})));
        events.push(Ok(json!({"messageStop": {"stopReason": "end_turn"}})));
        events
    }

    pub fn tool_reply(id: &str, name: &str, input: &Value) -> Vec<ScriptedEvent> {
        vec![
            Ok(json!({"messageStart": {"role": "assistant"}})),
            Ok(json!({"contentBlockStart": {"contentBlockIndex": 0, "start": {"toolUse": {"toolUseId": id, "name": name}}}})),
            Ok(json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"toolUse": {"input": input.to_string()}}}})),
            Ok(json!({"contentBlockStop": {"contentBlockIndex": 0}})),
            Ok(json!({"messageStop": {"stopReason": "tool_use"}})),
        ]
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn converse_stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<EventStream> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        let script = if responses.is_empty() {
            Self::text_reply(&[])
        } else {
            responses.remove(0)
        };
        let items: Vec<Result<Value>> = script
            .into_iter()
            .map(|item| item.map_err(|e| anyhow!(e)))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
