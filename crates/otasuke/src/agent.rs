use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolResult, ToolUse};
use crate::providers::base::{Provider, Usage};
use crate::tools::ToolHandler;

/// A content block being assembled from stream deltas
enum PendingBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: String,
    },
}

/// Folds ConverseStream events into the assistant message they describe
#[derive(Default)]
struct MessageBuilder {
    blocks: BTreeMap<u64, PendingBlock>,
    stop_reason: Option<String>,
}

impl MessageBuilder {
    fn apply(&mut self, event: &Value) {
        if let Some(start) = event.get("contentBlockStart") {
            let index = start["contentBlockIndex"].as_u64().unwrap_or(0);
            if let Some(tool_use) = start["start"].get("toolUse") {
                self.blocks.insert(
                    index,
                    PendingBlock::ToolUse {
                        id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                        name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                        input: String::new(),
                    },
                );
            }
        } else if let Some(delta) = event.get("contentBlockDelta") {
            let index = delta["contentBlockIndex"].as_u64().unwrap_or(0);
            if let Some(text) = delta["delta"]["text"].as_str() {
                match self
                    .blocks
                    .entry(index)
                    .or_insert_with(|| PendingBlock::Text(String::new()))
                {
                    PendingBlock::Text(buffer) => buffer.push_str(text),
                    PendingBlock::ToolUse { .. } => {
                        tracing::warn!(index, "Text delta for a tool use block ignored")
                    }
                }
            } else if let Some(fragment) = delta["delta"]["toolUse"]["input"].as_str() {
                if let Some(PendingBlock::ToolUse { input, .. }) = self.blocks.get_mut(&index) {
                    input.push_str(fragment);
                }
            }
        } else if let Some(stop) = event.get("messageStop") {
            self.stop_reason = stop["stopReason"].as_str().map(str::to_string);
        } else if let Some(metadata) = event.get("metadata") {
            let usage = Usage::from_metadata(metadata);
            tracing::debug!(
                input_tokens = ?usage.input_tokens,
                output_tokens = ?usage.output_tokens,
                total_tokens = ?usage.total_tokens,
                "Model usage"
            );
        }
    }

    fn finish(self) -> (Message, Option<String>) {
        let mut message = Message::assistant();
        for block in self.blocks.into_values() {
            message = match block {
                PendingBlock::Text(text) => message.with_text(text),
                PendingBlock::ToolUse { id, name, input } => {
                    let input = if input.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input).unwrap_or_else(|e| {
                            tracing::warn!(tool = %name, error = %e, "Tool input is not valid JSON");
                            json!({})
                        })
                    };
                    message.with_tool_use(id, name, input)
                }
            };
        }
        (message, self.stop_reason)
    }
}

/// The text carried by a `contentBlockDelta` event, if any
fn text_delta(event: &Value) -> Option<&str> {
    event["contentBlockDelta"]["delta"]["text"].as_str()
}

/// Agent binds a hosted model to a set of tools and keeps the conversation
pub struct Agent {
    provider: Box<dyn Provider>,
    tools: Vec<Box<dyn ToolHandler>>,
    system_prompt: String,
    messages: Mutex<Vec<Message>>,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider>, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            system_prompt: system_prompt.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Add a tool; tools are offered to the model in insertion order
    pub fn add_tool(&mut self, tool: Box<dyn ToolHandler>) {
        self.tools.push(tool);
    }

    pub fn tool_specs(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.spec().clone()).collect()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The conversation history as the model sees it
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    async fn dispatch_tool_call(&self, tool_use: &ToolUse) -> AgentResult<String> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name() == tool_use.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_use.name.clone()))?;

        tracing::info!(tool = %tool_use.name, id = %tool_use.tool_use_id, "Running tool");
        tool.call(tool_use.input.clone()).await
    }

    /// Stream one turn for `prompt`.
    ///
    /// Yields every model event wrapped as `{"event": ...}`, a
    /// `{"data": ..., "delta": {"text": ...}}` item for each text delta,
    /// and `{"message": ...}` for each completed assistant or tool result
    /// message. Tool calls are run until the model stops asking for them.
    /// On error the history is restored to where it was before the turn.
    pub fn stream(&self, prompt: &str) -> BoxStream<'_, Result<Value>> {
        let prompt = prompt.to_string();
        Box::pin(async_stream::stream! {
            let mut history = self.messages.lock().await;
            let checkpoint = history.len();
            history.push(Message::user().with_text(prompt));
            let tools = self.tool_specs();

            loop {
                let mut events = match self
                    .provider
                    .converse_stream(&self.system_prompt, &history, &tools)
                    .await
                {
                    Ok(events) => events,
                    Err(e) => {
                        history.truncate(checkpoint);
                        yield Err(e);
                        return;
                    }
                };

                let mut builder = MessageBuilder::default();
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            history.truncate(checkpoint);
                            yield Err(e);
                            return;
                        }
                    };
                    builder.apply(&event);
                    let text = text_delta(&event).map(str::to_string);
                    yield Ok(json!({ "event": event }));
                    if let Some(text) = text {
                        yield Ok(json!({ "data": text, "delta": { "text": text } }));
                    }
                }

                let (message, stop_reason) = builder.finish();
                yield Ok(json!({ "message": message }));

                let wants_tools = !message.tool_uses().is_empty();
                if stop_reason.as_deref() != Some("tool_use") || !wants_tools {
                    // A tool use without a result makes every later request invalid
                    if wants_tools {
                        tracing::warn!(stop_reason = ?stop_reason, "Dropping unanswered tool uses");
                    }
                    let message = message.without_tool_uses();
                    if message.content.is_empty() {
                        history.truncate(checkpoint);
                    } else {
                        history.push(message);
                    }
                    break;
                }
                history.push(message.clone());

                let tool_uses = message.tool_uses();
                let outputs = futures::future::join_all(
                    tool_uses.iter().map(|tool_use| self.dispatch_tool_call(tool_use)),
                )
                .await;

                let mut results = Message::user();
                for (tool_use, output) in tool_uses.iter().zip(outputs) {
                    let result = match output {
                        Ok(text) => ToolResult::success(&tool_use.tool_use_id, text),
                        Err(e) => {
                            tracing::warn!(tool = %tool_use.name, error = %e, "Tool call failed");
                            ToolResult::error(&tool_use.tool_use_id, e.to_string())
                        }
                    };
                    results = results.with_tool_result(result);
                }
                yield Ok(json!({ "message": results }));
                history.push(results);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ContentBlock;
    use crate::models::tool::ToolResultStatus;
    use crate::providers::mock::MockProvider;
    use async_trait::async_trait;
    use futures::TryStreamExt;

    struct EchoTool {
        spec: Tool,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                spec: Tool::new(
                    "echo",
                    "Echoes the text back",
                    json!({"type": "object", "properties": {"text": {"type": "string"}}}),
                ),
            }
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn spec(&self) -> &Tool {
            &self.spec
        }

        async fn call(&self, input: Value) -> AgentResult<String> {
            Ok(format!("echo: {}", input["text"].as_str().unwrap_or_default()))
        }
    }

    fn texts(items: &[Value]) -> Vec<&str> {
        items.iter().filter_map(|item| item["data"].as_str()).collect()
    }

    #[tokio::test]
    async fn test_simple_reply() -> Result<()> {
        let provider = MockProvider::new(vec![MockProvider::text_reply(&["Hello", " there"])]);
        let agent = Agent::new(Box::new(provider), "system");

        let items: Vec<Value> = agent.stream("Hi").try_collect().await?;
        assert_eq!(texts(&items), vec!["Hello", " there"]);
        assert!(items.iter().any(|item| item["event"].get("messageStop").is_some()));

        let history = agent.messages().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "Hi");
        assert_eq!(history[1].text(), "Hello there");
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_round_trip() -> Result<()> {
        let provider = MockProvider::new(vec![
            MockProvider::tool_reply("t1", "echo", &json!({"text": "ping"})),
            MockProvider::text_reply(&["done"]),
        ]);
        let requests = provider.requests();
        let mut agent = Agent::new(Box::new(provider), "system");
        agent.add_tool(Box::new(EchoTool::new()));

        let items: Vec<Value> = agent.stream("use the tool").try_collect().await?;
        assert_eq!(texts(&items), vec!["done"]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second.len(), 3);
        assert_eq!(
            second[1].tool_uses()[0].input,
            json!({"text": "ping"})
        );
        match &second[2].content[0] {
            ContentBlock::ToolResult(result) => {
                assert_eq!(result.tool_use_id, "t1");
                assert_eq!(result.status, ToolResultStatus::Success);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() -> Result<()> {
        let provider = MockProvider::new(vec![
            MockProvider::tool_reply("t1", "missing", &json!({})),
            MockProvider::text_reply(&["sorry"]),
        ]);
        let agent = Agent::new(Box::new(provider), "system");

        let items: Vec<Value> = agent.stream("go").try_collect().await?;
        let result = items
            .iter()
            .filter_map(|item| item.get("message"))
            .find_map(|message| message["content"][0].get("toolResult"))
            .cloned()
            .unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["content"][0]["text"], "Tool not found: missing");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_turn_rolls_back_history() -> Result<()> {
        let provider = MockProvider::new(vec![
            MockProvider::text_reply(&["first"]),
            vec![
                Ok(json!({"messageStart": {"role": "assistant"}})),
                Err("throttled".to_string()),
            ],
        ]);
        let agent = Agent::new(Box::new(provider), "system");

        let _: Vec<Value> = agent.stream("one").try_collect().await?;
        let result: Result<Vec<Value>> = agent.stream("two").try_collect().await;
        assert_eq!(result.unwrap_err().to_string(), "throttled");
        assert_eq!(agent.messages().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_carries_across_turns() -> Result<()> {
        let provider = MockProvider::new(vec![
            MockProvider::text_reply(&["a"]),
            MockProvider::text_reply(&["b"]),
        ]);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), "system");

        let _: Vec<Value> = agent.stream("one").try_collect().await?;
        let _: Vec<Value> = agent.stream("two").try_collect().await?;

        let requests = requests.lock().unwrap();
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[1][2].text(), "two");
        Ok(())
    }

    fn truncated_tool_reply(text: Option<&str>) -> Vec<crate::providers::mock::ScriptedEvent> {
        let mut events = vec![Ok(json!({"messageStart": {"role": "assistant"}}))];
        let mut index = 0;
        if let Some(text) = text {
            events.push(Ok(json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": text}}})));
            index = 1;
        }
        events.push(Ok(json!({"contentBlockStart": {"contentBlockIndex": index, "start": {"toolUse": {"toolUseId": "t1", "name": "echo"}}}})));
        events.push(Ok(json!({"contentBlockDelta": {"contentBlockIndex": index, "delta": {"toolUse": {"input": "{\"text\""}}}})));
        events.push(Ok(json!({"messageStop": {"stopReason": "max_tokens"}})));
        events
    }

    #[tokio::test]
    async fn test_cut_off_tool_use_is_not_kept() -> Result<()> {
        let provider = MockProvider::new(vec![
            truncated_tool_reply(None),
            MockProvider::text_reply(&["b"]),
        ]);
        let requests = provider.requests();
        let mut agent = Agent::new(Box::new(provider), "system");
        agent.add_tool(Box::new(EchoTool::new()));

        let _: Vec<Value> = agent.stream("one").try_collect().await?;
        let _: Vec<Value> = agent.stream("two").try_collect().await?;

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].iter().all(|message| message.tool_uses().is_empty()));
        assert_eq!(requests[1].len(), 1);
        assert_eq!(requests[1][0].text(), "two");
        Ok(())
    }

    #[tokio::test]
    async fn test_cut_off_tool_use_keeps_text() -> Result<()> {
        let provider = MockProvider::new(vec![
            truncated_tool_reply(Some("調べます")),
            MockProvider::text_reply(&["b"]),
        ]);
        let requests = provider.requests();
        let mut agent = Agent::new(Box::new(provider), "system");
        agent.add_tool(Box::new(EchoTool::new()));

        let _: Vec<Value> = agent.stream("one").try_collect().await?;
        let history = agent.messages().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text(), "調べます");
        assert!(history[1].tool_uses().is_empty());

        let _: Vec<Value> = agent.stream("two").try_collect().await?;
        let requests = requests.lock().unwrap();
        assert_eq!(requests[1].len(), 3);
        assert!(requests[1].iter().all(|message| message.tool_uses().is_empty()));
        Ok(())
    }

    #[test]
    fn test_builder_tolerates_bad_tool_input() {
        let mut builder = MessageBuilder::default();
        builder.apply(&json!({"contentBlockStart": {"contentBlockIndex": 1, "start": {"toolUse": {"toolUseId": "t", "name": "echo"}}}}));
        builder.apply(&json!({"contentBlockDelta": {"contentBlockIndex": 1, "delta": {"toolUse": {"input": "{not json"}}}}));
        builder.apply(&json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": "hi"}}}));
        builder.apply(&json!({"messageStop": {"stopReason": "tool_use"}}));

        let (message, stop) = builder.finish();
        assert_eq!(stop.as_deref(), Some("tool_use"));
        assert_eq!(message.text(), "hi");
        assert_eq!(message.tool_uses()[0].input, json!({}));
    }
}
