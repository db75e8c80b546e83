use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{required_str, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const TAVILY_HOST: &str = "https://api.tavily.com";

/// Web search through the Tavily API
pub struct TavilySearchTool {
    api_key: Option<String>,
    host: String,
    spec: Tool,
}

impl TavilySearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_host(api_key, TAVILY_HOST)
    }

    pub fn with_host(api_key: Option<String>, host: impl Into<String>) -> Self {
        Self {
            api_key,
            host: host.into(),
            spec: Tool::new(
                "tavily_search",
                "Web検索を行い、最新の情報を取得します。",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "検索クエリ"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        }
    }

    /// Run one search and return the full result object as text
    pub async fn search(&self, query: &str) -> AgentResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AgentError::ExecutionError("Tavily API key is not configured".to_string()))?;

        // a fresh client per call, nothing is pooled between searches
        let client = Client::new();
        let url = format!("{}/search", self.host.trim_end_matches('/'));
        tracing::debug!(tool = "tavily_search", query, "Searching the web");

        let response = client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::ExecutionError(format!(
                "Tavily search failed: {} - {}",
                status, text
            )));
        }

        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(value) => value.to_string(),
            Err(_) => text,
        })
    }
}

#[async_trait]
impl ToolHandler for TavilySearchTool {
    fn spec(&self) -> &Tool {
        &self.spec
    }

    async fn call(&self, input: Value) -> AgentResult<String> {
        let query = required_str(&input, "query")?;
        self.search(query).await
    }
}
