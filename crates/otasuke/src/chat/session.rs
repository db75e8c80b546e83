use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::chunk::{StreamChunk, CURSOR};
use super::view::TurnView;
use crate::agent::Agent;
use crate::models::role::Role;

/// Anything that can stream a reply to a prompt
pub trait ChatAgent: Send + Sync {
    fn stream<'a>(&'a self, prompt: &str) -> BoxStream<'a, Result<Value>>;
}

impl ChatAgent for Agent {
    fn stream<'a>(&'a self, prompt: &str) -> BoxStream<'a, Result<Value>> {
        Agent::stream(self, prompt)
    }
}

/// Builds the agent for a session on first use
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn ChatAgent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transcript yet
    Empty,
    /// Transcript shown, waiting for input
    Idle,
    /// A turn is streaming
    AwaitingResponse,
    /// The agent could not be built; input is refused until reset
    Halted,
}

/// One entry of the visible transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply that was appended to the transcript
    Completed(String),
    /// The turn failed; nothing was appended for the assistant
    Failed(String),
    /// The session cannot take input
    Halted(String),
}

pub fn tool_notice(name: &str) -> String {
    format!("🔧 **{}** ツールを実行中...", name)
}

/// Chat state of one browser session: its transcript and its agent
pub struct ChatSession {
    factory: Arc<dyn AgentFactory>,
    agent: Option<Arc<dyn ChatAgent>>,
    transcript: Vec<ChatMessage>,
    halted: Option<String>,
    awaiting_response: bool,
}

impl ChatSession {
    /// A fresh session: empty transcript, no agent
    pub fn new(factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            factory,
            agent: None,
            transcript: Vec::new(),
            halted: None,
            awaiting_response: false,
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        if self.halted.is_some() {
            SessionState::Halted
        } else if self.awaiting_response {
            SessionState::AwaitingResponse
        } else if self.transcript.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Idle
        }
    }

    /// Notice shown while the session is halted
    pub fn halted_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Build the agent if this session has none yet. Returns the halt notice
    /// when construction fails now or failed before.
    pub async fn prepare(&mut self) -> Option<&str> {
        if self.halted.is_none() && self.agent.is_none() {
            match self.factory.create().await {
                Ok(agent) => {
                    tracing::info!("Agent created for session");
                    self.agent = Some(agent);
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to create agent");
                    self.halted = Some(format!("エージェントの初期化に失敗しました: {}", e));
                }
            }
        }
        self.halted.as_deref()
    }

    /// Run one turn for `prompt`, rendering into `view` as the reply streams
    pub async fn run_turn(&mut self, prompt: &str, view: &mut dyn TurnView) -> TurnOutcome {
        if let Some(reason) = self.prepare().await {
            let reason = reason.to_string();
            view.error(&reason, &reason);
            return TurnOutcome::Halted(reason);
        }
        let Some(agent) = self.agent.clone() else {
            return TurnOutcome::Halted(String::new());
        };

        self.transcript.push(ChatMessage::user(prompt));
        view.user_message(prompt);
        self.awaiting_response = true;

        let result = stream_reply(agent.as_ref(), prompt, view).await;
        self.awaiting_response = false;

        match result {
            Ok(reply) => {
                self.transcript.push(ChatMessage::assistant(reply.clone()));
                TurnOutcome::Completed(reply)
            }
            Err(e) => {
                tracing::error!(error = ?e, "Turn failed");
                let message = format!("エラーが発生しました: {}", e);
                view.error(&message, &format!("{:?}", e));
                TurnOutcome::Failed(message)
            }
        }
    }
}

/// Consume the agent's stream for one turn and return the reply text.
///
/// Every tool invocation id is announced at most once. Text before a tool
/// notice stays in its own slot; the returned reply joins all slots.
async fn stream_reply(
    agent: &dyn ChatAgent,
    prompt: &str,
    view: &mut dyn TurnView,
) -> Result<String> {
    let mut announced: HashSet<String> = HashSet::new();
    let mut segments: Vec<String> = Vec::new();
    let mut buffer = String::new();

    let mut stream = agent.stream(prompt);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for decoded in StreamChunk::decode(&chunk) {
            match decoded {
                StreamChunk::ToolStart { id, name } => {
                    if !announced.insert(id) {
                        continue;
                    }
                    if !buffer.is_empty() {
                        view.render_text(&buffer);
                        segments.push(std::mem::take(&mut buffer));
                    }
                    view.info(&tool_notice(&name));
                }
                StreamChunk::Text(text) => {
                    buffer.push_str(&text);
                    view.render_text(&format!("{}{}", buffer, CURSOR));
                }
                StreamChunk::Unrecognized => {}
            }
        }
    }

    if !buffer.is_empty() {
        view.render_text(&buffer);
        segments.push(buffer);
    }
    Ok(segments.join("\n\n"))
}
