//! Wires the Bedrock model, the tools and the tutor prompt into an [`Agent`].
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::agent::Agent;
use crate::aws::AwsSession;
use crate::chat::{AgentFactory, ChatAgent};
use crate::credentials::Credentials;
use crate::prompt_template::{load_prompt, SYSTEM_PROMPT};
use crate::providers::bedrock::{BedrockProvider, BedrockProviderConfig};
use crate::tools::retrieve::RetrieveTool;
use crate::tools::tavily::{TavilySearchTool, TAVILY_HOST};

/// Claude Sonnet 4.5 through the US cross-region inference profile
pub const MODEL_ID: &str = "us.anthropic.claude-sonnet-4-5-20250929-v1:0";

#[derive(Serialize)]
struct PromptContext<'a> {
    kb_id: &'a str,
    region: &'a str,
}

pub fn render_system_prompt(kb_id: &str, region: &str) -> Result<String> {
    load_prompt(SYSTEM_PROMPT, &PromptContext { kb_id, region })
        .context("Failed to render system prompt")
}

/// Service endpoints; `None` means the regional AWS default
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub bedrock_runtime: Option<String>,
    pub agent_runtime: Option<String>,
    pub tavily: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            bedrock_runtime: None,
            agent_runtime: None,
            tavily: TAVILY_HOST.to_string(),
        }
    }
}

pub fn build_agent(credentials: &Credentials) -> Result<Agent> {
    build_agent_with(credentials, &Endpoints::default())
}

/// Build the tutor agent: Bedrock model, `[retrieve, tavily_search]`, and
/// the system prompt rendered once with the knowledge base and region.
pub fn build_agent_with(credentials: &Credentials, endpoints: &Endpoints) -> Result<Agent> {
    let session = AwsSession::from_credentials(credentials);
    session
        .credentials()
        .context("Unable to load AWS credentials")?;

    let system_prompt = render_system_prompt(
        credentials.knowledge_base_id.as_deref().unwrap_or_default(),
        &credentials.region,
    )?;

    let mut config = BedrockProviderConfig::new(MODEL_ID);
    config.endpoint = endpoints.bedrock_runtime.clone();
    let provider = BedrockProvider::new(session.clone(), config)?;

    let mut retrieve = RetrieveTool::new(session, credentials.knowledge_base_id.clone());
    if let Some(endpoint) = &endpoints.agent_runtime {
        retrieve = retrieve.with_endpoint(endpoint);
    }

    let mut agent = Agent::new(Box::new(provider), system_prompt);
    agent.add_tool(Box::new(retrieve));
    agent.add_tool(Box::new(TavilySearchTool::with_host(
        credentials.tavily_api_key.clone(),
        &endpoints.tavily,
    )));
    Ok(agent)
}

/// Builds one Bedrock-backed agent per session from shared credentials
pub struct BedrockAgentFactory {
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
}

impl BedrockAgentFactory {
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self::with_endpoints(credentials, Endpoints::default())
    }

    pub fn with_endpoints(credentials: Arc<Credentials>, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            endpoints,
        }
    }
}

#[async_trait]
impl AgentFactory for BedrockAgentFactory {
    async fn create(&self) -> Result<Arc<dyn ChatAgent>> {
        let agent = build_agent_with(&self.credentials, &self.endpoints)?;
        Ok(Arc::new(agent))
    }
}
