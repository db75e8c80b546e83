//! Tool adapters the agent can invoke on the model's behalf.
pub mod retrieve;
pub mod tavily;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool definition offered to the model
    fn spec(&self) -> &Tool;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Run the tool with the model-supplied input
    async fn call(&self, input: Value) -> AgentResult<String>;
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &str) -> AgentResult<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParameters(format!("The '{}' parameter is required", key)))
}
