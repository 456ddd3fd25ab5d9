//! LLM gateway abstraction
//!
//! Provides a unified chat-completion interface:
//! - OpenRouter-compatible HTTP gateway (`/chat/completions`)
//! - Optional schema-constrained output (`response_format: json_schema`)
//! - A deterministic mock for local runs
//!
//! The client performs exactly one request per call. Failures come back as
//! [`LlmError`] with a [`LlmErrorKind`] discriminant so callers can decide on
//! retries structurally.

use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Structured-output contract sent as `response_format`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub json_schema: JsonSchemaSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub strict: bool,
    pub schema: Value,
}

impl ResponseFormat {
    /// Strict JSON schema response format
    pub fn json_schema(name: impl Into<String>, schema: Value) -> Self {
        Self {
            kind: "json_schema".to_string(),
            json_schema: JsonSchemaSpec {
                name: name.into(),
                strict: true,
                schema,
            },
        }
    }
}

/// Per-call options; unset fields fall back to the client defaults
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub params: Map<String, Value>,
    pub response_format: Option<ResponseFormat>,
}

impl ChatOptions {
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Message content, parsed when it looks like a JSON object
#[derive(Debug, Clone, PartialEq)]
pub enum ChatContent {
    Json(Value),
    Text(String),
}

impl ChatContent {
    /// Parse content starting with `{`; anything else, or a failed parse,
    /// stays raw text.
    pub fn parse(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            if let Ok(value) = serde_json::from_str(content) {
                return ChatContent::Json(value);
            }
        }
        ChatContent::Text(content.to_string())
    }
}

/// Completion result
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub data: ChatContent,
    /// Full response body as returned by the gateway
    pub raw: Value,
}

/// Discriminant for [`LlmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    SchemaRejected,
    HttpError,
    NetworkError,
    InvalidResponse,
    MissingCredential,
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM gateway API key is required")]
    MissingCredential,

    #[error("LLM gateway rejected the response schema ({status}): {body}")]
    SchemaRejected { status: u16, body: String },

    #[error("LLM gateway error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("LLM gateway request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Invalid response from LLM gateway: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::MissingCredential => LlmErrorKind::MissingCredential,
            LlmError::SchemaRejected { .. } => LlmErrorKind::SchemaRejected,
            LlmError::Http { .. } => LlmErrorKind::HttpError,
            LlmError::Network(_) => LlmErrorKind::NetworkError,
            LlmError::InvalidResponse(_) => LlmErrorKind::InvalidResponse,
        }
    }
}

/// Trait for chat completion
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Perform one chat completion request
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError>;

    /// Model used when the options do not name one
    fn default_model(&self) -> &str;
}

/// OpenRouter-compatible chat completion client
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    default_params: Map<String, Value>,
    referer: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenRouterClient {
    /// Create a new client; fails fast without an API key
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LlmError::MissingCredential)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(LlmError::Network)?;

        let mut default_params = Map::new();
        default_params.insert("temperature".into(), Value::from(config.temperature));
        default_params.insert("top_p".into(), Value::from(config.top_p));
        default_params.insert("max_tokens".into(), Value::from(config.max_tokens));

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            default_params,
            referer: config.referer.clone(),
            title: config.title.clone(),
        })
    }

    /// Defaults first, caller params on top
    fn build_payload(&self, messages: &[ChatMessage], options: &ChatOptions) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "model".into(),
            Value::from(options.model.as_deref().unwrap_or(&self.default_model)),
        );
        payload.insert("messages".into(), serde_json::json!(messages));

        for (key, value) in self.default_params.iter().chain(options.params.iter()) {
            payload.insert(key.clone(), value.clone());
        }

        if let Some(ref format) = options.response_format {
            payload.insert("response_format".into(), serde_json::json!(format));
        }

        Value::Object(payload)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request.bearer_auth(&self.api_key);
        if let Some(ref referer) = self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.title {
            request = request.header("X-Title", title);
        }
        request
    }

    /// List model identifiers offered by the gateway
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(LlmError::Network)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http { status, body });
        }

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse models: {}", e)))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl ChatCompletion for OpenRouterClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.build_payload(messages, &options);

        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(LlmError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let status = status.as_u16();

            tracing::warn!(status, schema = options.response_format.is_some(), "LLM gateway returned an error");

            // A schema-constrained request refused as a bad request means the
            // model or provider does not support the schema.
            if options.response_format.is_some() && matches!(status, 400 | 422) {
                return Err(LlmError::SchemaRejected { status, body });
            }
            return Err(LlmError::Http { status, body });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = raw
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?
            .to_string();

        Ok(ChatResponse {
            data: ChatContent::parse(&content),
            raw,
        })
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Deterministic gateway for local development
///
/// Returns a fixed set of cards, growing with the length of the last user
/// message.
pub struct MockChat;

const MOCK_CARDS: &[(&str, &str)] = &[
    ("What is the capital of France?", "Paris"),
    ("Who wrote 'Romeo and Juliet'?", "William Shakespeare"),
    ("What is the chemical symbol for water?", "H2O"),
    ("What is the largest planet in our solar system?", "Jupiter"),
    ("Who developed the theory of relativity?", "Albert Einstein"),
];

#[async_trait]
impl ChatCompletion for MockChat {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let text_len = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.chars().count())
            .unwrap_or(0);

        let count = match text_len {
            n if n > 5000 => 5,
            n if n > 3000 => 4,
            _ => 3,
        };

        let cards: Vec<Value> = MOCK_CARDS
            .iter()
            .take(count)
            .map(|(front, back)| serde_json::json!({ "front": front, "back": back }))
            .collect();
        let data = serde_json::json!({ "flashcards": cards });

        Ok(ChatResponse {
            raw: serde_json::json!({ "mock": true }),
            data: ChatContent::Json(data),
        })
    }

    fn default_model(&self) -> &str {
        "mock-ai-model"
    }
}

/// Create a chat client based on configuration
pub fn create_chat_client(config: &LlmConfig) -> Result<Arc<dyn ChatCompletion>, LlmError> {
    match config.provider.as_str() {
        "openrouter" => Ok(Arc::new(OpenRouterClient::new(config)?)),
        "mock" => Ok(Arc::new(MockChat)),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using OpenRouter");
            Ok(Arc::new(OpenRouterClient::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::{get, post}, Json, Router};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured {
        payload: Arc<Mutex<Option<Value>>>,
        auth: Arc<Mutex<Option<String>>>,
    }

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn completion(content: &str) -> Value {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn config_for(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url,
            ..LlmConfig::default()
        }
    }

    async fn stub_replying(status: StatusCode, body: Value) -> (String, Captured) {
        let captured = Captured::default();
        let router = Router::new()
            .route(
                "/chat/completions",
                post(
                    move |State(captured): State<Captured>, headers: HeaderMap, Json(payload): Json<Value>| {
                        let body = body.clone();
                        async move {
                            *captured.payload.lock().unwrap() = Some(payload);
                            *captured.auth.lock().unwrap() = headers
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(String::from);
                            (status, Json(body))
                        }
                    },
                ),
            )
            .with_state(captured.clone());
        (spawn_stub(router).await, captured)
    }

    #[test]
    fn test_missing_credential_fails_fast() {
        let err = OpenRouterClient::new(&LlmConfig::default()).err().unwrap();
        assert_eq!(err.kind(), LlmErrorKind::MissingCredential);

        let blank = LlmConfig { api_key: Some("  ".into()), ..LlmConfig::default() };
        assert!(OpenRouterClient::new(&blank).is_err());
    }

    #[test]
    fn test_content_parsing() {
        assert_eq!(
            ChatContent::parse(r#" {"flashcards": []}"#),
            ChatContent::Json(serde_json::json!({ "flashcards": [] }))
        );
        // Arrays and prose are returned raw
        assert_eq!(ChatContent::parse("[1, 2]"), ChatContent::Text("[1, 2]".into()));
        assert_eq!(ChatContent::parse("Sure!"), ChatContent::Text("Sure!".into()));
        // Broken JSON falls back to the raw string
        assert_eq!(ChatContent::parse("{not json"), ChatContent::Text("{not json".into()));
    }

    #[tokio::test]
    async fn test_payload_merges_params_over_defaults() {
        let (base_url, captured) =
            stub_replying(StatusCode::OK, completion(r#"{"flashcards": []}"#)).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let options = ChatOptions::default()
            .with_param("temperature", 0.2)
            .with_response_format(ResponseFormat::json_schema("cards", serde_json::json!({"type": "object"})));
        let response = client
            .chat_completion(&[ChatMessage::system("sys"), ChatMessage::user("hi")], options)
            .await
            .unwrap();

        assert_eq!(response.data, ChatContent::Json(serde_json::json!({ "flashcards": [] })));
        assert_eq!(response.raw["id"], "gen-1");

        let payload = captured.payload.lock().unwrap().clone().unwrap();
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["temperature"].as_f64().map(|t| (t * 10.0).round()), Some(2.0));
        assert_eq!(payload["max_tokens"], 1000);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert_eq!(payload["response_format"]["json_schema"]["strict"], true);
        assert_eq!(captured.auth.lock().unwrap().as_deref(), Some("Bearer sk-test"));
    }

    #[tokio::test]
    async fn test_caller_model_overrides_default() {
        let (base_url, captured) =
            stub_replying(StatusCode::OK, completion(r#"{"flashcards": []}"#)).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let options = ChatOptions {
            model: Some("anthropic/claude-3-haiku".to_string()),
            ..ChatOptions::default()
        }
        .with_param("max_tokens", 200);
        client
            .chat_completion(&[ChatMessage::user("hi")], options)
            .await
            .unwrap();

        let payload = captured.payload.lock().unwrap().clone().unwrap();
        assert_eq!(payload["model"], "anthropic/claude-3-haiku");
        assert_eq!(payload["max_tokens"], 200);
        assert_eq!(client.default_model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_plain_text_content_is_returned_raw() {
        let (base_url, _) = stub_replying(StatusCode::OK, completion("[{\"front\":\"a\"}]")).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let response = client
            .chat_completion(&[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(response.data, ChatContent::Text("[{\"front\":\"a\"}]".into()));
    }

    #[tokio::test]
    async fn test_bad_request_with_schema_is_schema_rejection() {
        let (base_url, _) =
            stub_replying(StatusCode::BAD_REQUEST, serde_json::json!({"error": "json_schema unsupported"})).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let with_schema = ChatOptions::default()
            .with_response_format(ResponseFormat::json_schema("cards", serde_json::json!({})));
        let err = client.chat_completion(&[ChatMessage::user("hi")], with_schema).await.unwrap_err();
        assert_eq!(err.kind(), LlmErrorKind::SchemaRejected);

        let err = client
            .chat_completion(&[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LlmErrorKind::HttpError);
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let (base_url, _) =
            stub_replying(StatusCode::BAD_GATEWAY, serde_json::json!({"error": "upstream down"})).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let with_schema = ChatOptions::default()
            .with_response_format(ResponseFormat::json_schema("cards", serde_json::json!({})));
        match client.chat_completion(&[ChatMessage::user("hi")], with_schema).await {
            Err(LlmError::Http { status, body }) => {
                assert_eq!(status, 502);
                assert!(body.contains("upstream down"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_choices_is_invalid_response() {
        let (base_url, _) = stub_replying(StatusCode::OK, serde_json::json!({ "choices": [] })).await;
        let client = OpenRouterClient::new(&config_for(base_url)).unwrap();

        let err = client
            .chat_completion(&[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LlmErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OpenRouterClient::new(&config_for(format!("http://{}", addr))).unwrap();
        let err = client
            .chat_completion(&[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LlmErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn test_list_models() {
        let router = Router::new().route(
            "/models",
            get(|| async { Json(serde_json::json!({ "data": [{ "id": "a/model" }, { "id": "b/model" }] })) }),
        );
        let client = OpenRouterClient::new(&config_for(spawn_stub(router).await)).unwrap();

        assert_eq!(client.list_models().await.unwrap(), vec!["a/model", "b/model"]);
    }

    #[tokio::test]
    async fn test_mock_scales_with_text_length() {
        let short = MockChat
            .chat_completion(&[ChatMessage::user("x".repeat(1200))], ChatOptions::default())
            .await
            .unwrap();
        let long = MockChat
            .chat_completion(&[ChatMessage::user("x".repeat(6000))], ChatOptions::default())
            .await
            .unwrap();

        let count = |r: &ChatResponse| match &r.data {
            ChatContent::Json(v) => v["flashcards"].as_array().map(Vec::len).unwrap_or(0),
            ChatContent::Text(_) => 0,
        };
        assert_eq!(count(&short), 3);
        assert_eq!(count(&long), 5);
    }
}
