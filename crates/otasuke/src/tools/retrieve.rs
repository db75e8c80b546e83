//! Knowledge-base lookup through the Bedrock Agent Runtime `Retrieve` API.
//!
//! The model is told in the system prompt which knowledge base and region
//! to pass. When it leaves them out the configured values are filled in;
//! values the model does pass are used as given.
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::Write;
use url::Url;

use super::{required_str, ToolHandler};
use crate::aws::AwsSession;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;
use crate::providers::bedrock::BEDROCK_SIGNING_NAME;

const DEFAULT_NUMBER_OF_RESULTS: u64 = 10;
const DEFAULT_MIN_SCORE: f64 = 0.4;

pub struct RetrieveTool {
    client: Client,
    session: AwsSession,
    knowledge_base_id: Option<String>,
    endpoint: Option<String>,
    spec: Tool,
}

impl RetrieveTool {
    pub fn new(session: AwsSession, knowledge_base_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            session,
            knowledge_base_id,
            endpoint: None,
            spec: Tool::new(
                "retrieve",
                "Bedrockナレッジベースから、クエリに関連する情報を検索します。",
                json!({
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "検索したい内容"
                        },
                        "knowledgeBaseId": {
                            "type": "string",
                            "description": "検索対象のナレッジベースID"
                        },
                        "region": {
                            "type": "string",
                            "description": "ナレッジベースのあるAWSリージョン"
                        },
                        "numberOfResults": {
                            "type": "integer",
                            "description": "取得する最大件数 (既定値 10)"
                        },
                        "score": {
                            "type": "number",
                            "description": "この値未満の関連度スコアの結果を除外します (既定値 0.4)"
                        }
                    },
                    "required": ["text"]
                }),
            ),
        }
    }

    /// Send requests to `endpoint` instead of the regional service
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn url(&self, region: &str, knowledge_base_id: &str) -> AgentResult<Url> {
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-agent-runtime.{}.amazonaws.com", region),
        };
        let raw = format!(
            "{}/knowledgebases/{}/retrieve",
            base,
            urlencoding::encode(knowledge_base_id)
        );
        Url::parse(&raw).map_err(|e| AgentError::InvalidParameters(format!("{}: {}", raw, e)))
    }
}

/// Region names end up in the endpoint host, so only plain labels pass
fn is_valid_region(region: &str) -> bool {
    Regex::new(r"^[a-z0-9-]+$")
        .map(|re| re.is_match(region))
        .unwrap_or(false)
}

fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Human-readable source of one retrieval result
fn location_label(location: &Value) -> String {
    let Some(object) = location.as_object() else {
        return "unknown".to_string();
    };
    for (key, value) in object {
        if key == "type" {
            continue;
        }
        for field in ["uri", "url", "id"] {
            if let Some(found) = value.get(field).and_then(Value::as_str) {
                return found.to_string();
            }
        }
    }
    object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Render retrieval results, dropping those under `min_score`
pub fn format_results(response: &Value, min_score: f64) -> String {
    let results: Vec<&Value> = response["retrievalResults"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter(|r| r["score"].as_f64().unwrap_or(0.0) >= min_score)
                .collect()
        })
        .unwrap_or_default();

    if results.is_empty() {
        return format!("No results found above score threshold {}.", min_score);
    }

    let mut output = format!(
        "Retrieved {} results with score >= {}:\n",
        results.len(),
        min_score
    );
    for result in results {
        let _ = write!(
            output,
            "\nScore: {:.4}\nDocument ID: {}\nContent: {}\n",
            result["score"].as_f64().unwrap_or(0.0),
            location_label(&result["location"]),
            result["content"]["text"].as_str().unwrap_or_default()
        );
    }
    output
}

#[async_trait]
impl ToolHandler for RetrieveTool {
    fn spec(&self) -> &Tool {
        &self.spec
    }

    async fn call(&self, input: Value) -> AgentResult<String> {
        let text = required_str(&input, "text")?;
        let knowledge_base_id = optional_str(&input, "knowledgeBaseId")
            .or(self.knowledge_base_id.as_deref().filter(|id| !id.is_empty()))
            .ok_or_else(|| {
                AgentError::InvalidParameters("The 'knowledgeBaseId' parameter is required".to_string())
            })?;
        let region = optional_str(&input, "region").unwrap_or(self.session.region());
        if !is_valid_region(region) {
            return Err(AgentError::InvalidParameters(format!(
                "Invalid region: {}",
                region
            )));
        }
        let number_of_results = input
            .get("numberOfResults")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_NUMBER_OF_RESULTS);
        let min_score = input
            .get("score")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIN_SCORE);

        let session = if region == self.session.region() {
            self.session.clone()
        } else {
            AwsSession::new(region, self.session.source().clone())
        };

        let body = json!({
            "retrievalQuery": { "text": text },
            "retrievalConfiguration": {
                "vectorSearchConfiguration": { "numberOfResults": number_of_results }
            }
        });
        let body = serde_json::to_vec(&body).map_err(|e| AgentError::Internal(e.to_string()))?;

        tracing::debug!(
            tool = "retrieve",
            knowledge_base_id,
            region,
            number_of_results,
            "Querying knowledge base"
        );

        let response = session
            .signed_post(
                &self.client,
                self.url(region, knowledge_base_id)?,
                BEDROCK_SIGNING_NAME,
                body,
            )
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::ExecutionError(format!(
                "Knowledge base retrieval failed: {} - {}",
                status, text
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::ExecutionError(format!("Invalid retrieve response: {}", e)))?;
        Ok(format_results(&parsed, min_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{AwsCredentials, CredentialSource};
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> AwsSession {
        AwsSession::new(
            "us-west-2",
            CredentialSource::Explicit(AwsCredentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "SECRET".to_string(),
                session_token: None,
            }),
        )
    }

    fn sample_response() -> Value {
        json!({
            "retrievalResults": [
                {
                    "content": {"text": "Codespacesはブラウザで使える開発環境です。"},
                    "location": {"type": "S3", "s3Location": {"uri": "s3://handson/faq.md"}},
                    "score": 0.82
                },
                {
                    "content": {"text": "関係の薄い情報"},
                    "location": {"type": "WEB", "webLocation": {"url": "https://example.com"}},
                    "score": 0.12
                }
            ]
        })
    }

    #[test]
    fn test_format_results_filters_by_score() {
        let output = format_results(&sample_response(), 0.4);
        assert!(output.starts_with("Retrieved 1 results with score >= 0.4:"));
        assert!(output.contains("Score: 0.8200"));
        assert!(output.contains("Document ID: s3://handson/faq.md"));
        assert!(output.contains("Codespacesはブラウザで使える開発環境です。"));
        assert!(!output.contains("関係の薄い情報"));
    }

    #[test]
    fn test_format_results_empty() {
        let output = format_results(&json!({"retrievalResults": []}), 0.4);
        assert_eq!(output, "No results found above score threshold 0.4.");
    }

    #[test]
    fn test_location_label_variants() {
        assert_eq!(
            location_label(&json!({"type": "WEB", "webLocation": {"url": "https://example.com"}})),
            "https://example.com"
        );
        assert_eq!(location_label(&json!({"type": "CUSTOM"})), "CUSTOM");
        assert_eq!(location_label(&Value::Null), "unknown");
    }

    #[tokio::test]
    async fn test_retrieve_uses_configured_knowledge_base_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/KB123/retrieve"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "retrievalQuery": {"text": "Codespacesとは"},
                "retrievalConfiguration": {"vectorSearchConfiguration": {"numberOfResults": 3}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .expect(1)
            .mount(&server)
            .await;

        let tool = RetrieveTool::new(session(), Some("KB123".to_string())).with_endpoint(server.uri());
        let output = tool
            .call(json!({"text": "Codespacesとは", "numberOfResults": 3}))
            .await
            .unwrap();
        assert!(output.contains("s3://handson/faq.md"));
    }

    #[tokio::test]
    async fn test_retrieve_prefers_model_supplied_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/OTHER/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retrievalResults": []})))
            .expect(1)
            .mount(&server)
            .await;

        let tool = RetrieveTool::new(session(), Some("KB123".to_string())).with_endpoint(server.uri());
        let output = tool
            .call(json!({"text": "q", "knowledgeBaseId": "OTHER", "region": "us-west-2"}))
            .await
            .unwrap();
        assert!(output.starts_with("No results found"));
    }

    #[tokio::test]
    async fn test_retrieve_without_any_knowledge_base() {
        let tool = RetrieveTool::new(session(), None);
        let err = tool.call(json!({"text": "q"})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }

    #[test]
    fn test_region_names() {
        assert!(is_valid_region("us-west-2"));
        assert!(is_valid_region("ap-northeast-1"));
        assert!(!is_valid_region(""));
        assert!(!is_valid_region("US-WEST-2"));
        assert!(!is_valid_region("x@127.0.0.1:39001/#"));
        assert!(!is_valid_region("evil.example.com"));
    }

    #[tokio::test]
    async fn test_retrieve_rejects_region_that_changes_host() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retrievalResults": []})))
            .expect(0)
            .mount(&server)
            .await;

        let hostile = format!("x@{}/#", server.address());
        let tool = RetrieveTool::new(
            AwsSession::new(
                "us-west-2",
                CredentialSource::Explicit(AwsCredentials {
                    access_key_id: "AKID".to_string(),
                    secret_access_key: "SECRET".to_string(),
                    session_token: Some("TOKEN".to_string()),
                }),
            ),
            Some("KB123".to_string()),
        );
        let err = tool
            .call(json!({"text": "q", "region": hostile}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(ref m) if m.contains("Invalid region")));
    }

    #[tokio::test]
    async fn test_retrieve_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/KB123/retrieve"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "KnowledgeBase not found"})))
            .mount(&server)
            .await;

        let tool = RetrieveTool::new(session(), Some("KB123".to_string())).with_endpoint(server.uri());
        let err = tool.call(json!({"text": "q"})).await.unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(ref m) if m.contains("404")));
    }
}
