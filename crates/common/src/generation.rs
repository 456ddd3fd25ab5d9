//! Flashcard generation orchestrator
//!
//! One attempt runs through: hash the source text, record a generation row,
//! ask the LLM for cards under a strict JSON schema (falling back once to a
//! plain-JSON prompt when the schema is refused), map the cards to
//! proposals and finalize the row with the count and elapsed time.
//!
//! Proposals are returned to the caller only. They become flashcards when
//! the user saves them.

use crate::db::models::FlashcardSource;
use crate::db::{NewGeneration, NewGenerationErrorLog, Store};
use crate::errors::{AppError, Result};
use crate::llm::{ChatCompletion, ChatContent, ChatMessage, ChatOptions, LlmError, LlmErrorKind, ResponseFormat};
use crate::metrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "You are an assistant that writes study flashcards. \
Read the text supplied by the user and produce concise question/answer pairs covering its key facts and ideas. \
Each front is a question of at most 200 characters; each back is an answer of at most 500 characters. \
Write the cards in the language of the source text.";

const PLAIN_JSON_INSTRUCTIONS: &str = "Respond with JSON only, no prose and no code fences, in exactly this shape: \
{\"flashcards\": [{\"front\": \"question\", \"back\": \"answer\"}]}";

const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// AI-produced card awaiting review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardProposal {
    pub front: String,
    pub back: String,
    pub source: FlashcardSource,
}

/// Result of a successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateCreateResponse {
    pub generation_id: i64,
    pub generated_count: usize,
    pub flashcards_proposals: Vec<FlashcardProposal>,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    #[serde(default)]
    front: String,
    #[serde(default)]
    back: String,
}

/// SHA-256 hex digest of the source text
pub fn hash_source_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn flashcards_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "flashcards": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "front": { "type": "string" },
                        "back": { "type": "string" }
                    },
                    "required": ["front", "back"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["flashcards"],
        "additionalProperties": false
    })
}

/// Cards from a bare array or an object holding a `flashcards` array
fn cards_from_value(value: &Value) -> Option<Vec<RawCard>> {
    let items = match value {
        Value::Array(_) => value,
        Value::Object(map) => map.get("flashcards").filter(|v| v.is_array())?,
        _ => return None,
    };
    serde_json::from_value(items.clone()).ok()
}

fn cards_from_text(text: &str) -> Option<Vec<RawCard>> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str::<Value>(unfenced.trim())
        .ok()
        .as_ref()
        .and_then(cards_from_value)
}

fn cards_from_content(content: &ChatContent) -> Option<Vec<RawCard>> {
    match content {
        ChatContent::Json(value) => cards_from_value(value),
        ChatContent::Text(text) => cards_from_text(text),
    }
}

/// Error code written to the generation error log
pub fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Upstream(e) => match e.kind() {
            LlmErrorKind::SchemaRejected => "SCHEMA_REJECTED",
            LlmErrorKind::HttpError => "LLM_HTTP_ERROR",
            LlmErrorKind::NetworkError => "LLM_NETWORK_ERROR",
            LlmErrorKind::InvalidResponse => "LLM_INVALID_RESPONSE",
            LlmErrorKind::MissingCredential => "GEN_ERROR",
        },
        AppError::Database(_) | AppError::DatabaseConnection { .. } | AppError::Persistence { .. } => {
            "PERSISTENCE_ERROR"
        }
        _ => "GEN_ERROR",
    }
}

/// Source text facts shared by the generation row and the error log
struct SourceFacts {
    hash: String,
    length: i32,
    model: String,
}

pub struct GenerationService {
    store: Arc<dyn Store>,
    llm: Arc<dyn ChatCompletion>,
}

impl GenerationService {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn ChatCompletion>) -> Self {
        Self { store, llm }
    }

    /// Run one generation attempt for `user_id`
    ///
    /// Any failure after hashing is written to the error log (best effort)
    /// and returned unchanged.
    #[instrument(skip(self, source_text), fields(text_len = source_text.len()))]
    pub async fn generate(&self, user_id: Uuid, source_text: &str) -> Result<GenerateCreateResponse> {
        let started = Instant::now();
        let facts = SourceFacts {
            hash: hash_source_text(source_text),
            length: source_text.chars().count() as i32,
            model: self.llm.default_model().to_string(),
        };

        let mut fallback_used = false;
        let outcome = self
            .attempt(user_id, source_text, &facts, started, &mut fallback_used)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(response) => {
                metrics::record_generation(elapsed, response.generated_count, true, fallback_used);
                info!(
                    generation_id = response.generation_id,
                    generated_count = response.generated_count,
                    fallback_used,
                    "Generation completed"
                );
                Ok(response)
            }
            Err(err) => {
                metrics::record_generation(elapsed, 0, false, fallback_used);
                self.log_failure(user_id, &facts, &err).await;
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        user_id: Uuid,
        source_text: &str,
        facts: &SourceFacts,
        started: Instant,
        fallback_used: &mut bool,
    ) -> Result<GenerateCreateResponse> {
        let generation = self
            .store
            .insert_generation(NewGeneration {
                user_id,
                model: facts.model.clone(),
                source_text_hash: facts.hash.clone(),
                source_text_length: facts.length,
            })
            .await?;

        let cards = self.request_cards(source_text, fallback_used).await?;

        let flashcards_proposals: Vec<FlashcardProposal> = cards
            .into_iter()
            .map(|card| (card.front.trim().to_string(), card.back.trim().to_string()))
            .filter(|(front, back)| !front.is_empty() && !back.is_empty())
            .map(|(front, back)| FlashcardProposal {
                front,
                back,
                source: FlashcardSource::AiFull,
            })
            .collect();

        let duration_ms = (started.elapsed().as_secs_f64() * 1000.0).round() as i32;
        self.store
            .finalize_generation(generation.id, flashcards_proposals.len() as i32, duration_ms)
            .await?;

        Ok(GenerateCreateResponse {
            generation_id: generation.id,
            generated_count: flashcards_proposals.len(),
            flashcards_proposals,
        })
    }

    async fn request_cards(&self, source_text: &str, fallback_used: &mut bool) -> Result<Vec<RawCard>> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(source_text)];
        let options = ChatOptions::default()
            .with_response_format(ResponseFormat::json_schema("flashcards", flashcards_schema()));

        // A 200 whose content ignores the schema counts as a rejection too
        let structured = self
            .llm
            .chat_completion(&messages, options)
            .await
            .and_then(|response| {
                cards_from_content(&response.data).ok_or_else(|| LlmError::SchemaRejected {
                    status: 200,
                    body: "response did not follow the flashcards schema".to_string(),
                })
            });

        match structured {
            Ok(cards) => Ok(cards),
            Err(err) if err.kind() == LlmErrorKind::SchemaRejected => {
                warn!(error = %err, "Schema-constrained request rejected, retrying with plain JSON prompt");
                *fallback_used = true;
                self.request_plain_json(source_text).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn request_plain_json(&self, source_text: &str) -> Result<Vec<RawCard>> {
        let system = format!("{}\n\n{}", SYSTEM_PROMPT, PLAIN_JSON_INSTRUCTIONS);
        let messages = [ChatMessage::system(system), ChatMessage::user(source_text)];

        let response = self.llm.chat_completion(&messages, ChatOptions::default()).await?;
        cards_from_content(&response.data).ok_or_else(|| {
            AppError::Upstream(LlmError::InvalidResponse(
                "model did not return a JSON flashcard list".to_string(),
            ))
        })
    }

    async fn log_failure(&self, user_id: Uuid, facts: &SourceFacts, err: &AppError) {
        let code = error_code(err);
        metrics::record_generation_error(code);
        warn!(error = %err, code, "Generation failed");

        let log = NewGenerationErrorLog {
            user_id,
            error_code: code.to_string(),
            error_message: err.to_string().chars().take(MAX_ERROR_MESSAGE_CHARS).collect(),
            model: facts.model.clone(),
            source_text_hash: facts.hash.clone(),
            source_text_length: facts.length,
        };

        if let Err(log_err) = self.store.insert_generation_error_log(log).await {
            tracing::error!(error = %log_err, "Failed to write generation error log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, StoreOp};
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued results and records whether each call carried a schema
    #[derive(Default)]
    struct ScriptedChat {
        replies: Mutex<VecDeque<std::result::Result<ChatResponse, LlmError>>>,
        calls: Mutex<Vec<bool>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<std::result::Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedChat {
        async fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            options: ChatOptions,
        ) -> std::result::Result<ChatResponse, LlmError> {
            self.calls.lock().unwrap().push(options.response_format.is_some());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted reply".into())))
        }

        fn default_model(&self) -> &str {
            "test-model"
        }
    }

    fn json_reply(value: Value) -> std::result::Result<ChatResponse, LlmError> {
        Ok(ChatResponse { data: ChatContent::Json(value), raw: Value::Null })
    }

    fn text_reply(text: &str) -> std::result::Result<ChatResponse, LlmError> {
        Ok(ChatResponse { data: ChatContent::Text(text.to_string()), raw: Value::Null })
    }

    fn rejected() -> std::result::Result<ChatResponse, LlmError> {
        Err(LlmError::SchemaRejected { status: 400, body: "json_schema not supported".into() })
    }

    fn source_text() -> String {
        "Photosynthesis converts light energy into chemical energy. ".repeat(20)
    }

    fn service(store: &Arc<InMemoryStore>, llm: &Arc<ScriptedChat>) -> GenerationService {
        GenerationService::new(store.clone(), llm.clone())
    }

    #[test]
    fn test_hash_is_stable_sha256() {
        let hash = hash_source_text("abc");
        assert_eq!(hash, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(hash, hash_source_text("abc"));
        assert_ne!(hash, hash_source_text("abd"));
    }

    #[tokio::test]
    async fn test_structured_success_finalizes_generation() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![json_reply(serde_json::json!({
            "flashcards": [
                { "front": "What does photosynthesis produce?", "back": "Chemical energy" },
                { "front": "What powers photosynthesis?", "back": "Light" }
            ]
        }))]);
        let user = Uuid::new_v4();

        let response = service(&store, &llm).generate(user, &source_text()).await.unwrap();

        assert_eq!(response.generated_count, 2);
        assert!(response.flashcards_proposals.iter().all(|p| p.source == FlashcardSource::AiFull));
        assert_eq!(llm.calls(), vec![true]);

        let generations = store.generations();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].id, response.generation_id);
        assert_eq!(generations[0].user_id, user);
        assert_eq!(generations[0].generated_count, 2);
        assert_eq!(generations[0].model, "test-model");
        assert_eq!(generations[0].source_text_length, source_text().chars().count() as i32);
        assert_eq!(generations[0].source_text_hash, hash_source_text(&source_text()));

        // Proposals are not flashcards yet
        assert!(store.flashcards().is_empty());
        assert!(store.error_logs().is_empty());
    }

    #[tokio::test]
    async fn test_schema_rejection_falls_back_to_plain_json_array() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![
            rejected(),
            text_reply(r#"[{"front": "Q1?", "back": "A1"}, {"front": "Q2?", "back": "A2"}]"#),
        ]);

        let response = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap();

        assert_eq!(response.generated_count, 2);
        assert_eq!(llm.calls(), vec![true, false]);
        assert!(store.error_logs().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_accepts_object_and_fenced_text() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![
            rejected(),
            json_reply(serde_json::json!({ "flashcards": [{ "front": "Q?", "back": "A" }] })),
        ]);
        let response = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap();
        assert_eq!(response.generated_count, 1);

        let llm = ScriptedChat::new(vec![
            rejected(),
            text_reply("```json\n{\"flashcards\": [{\"front\": \"Q?\", \"back\": \"A\"}]}\n```"),
        ]);
        let response = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap();
        assert_eq!(response.generated_count, 1);
    }

    #[tokio::test]
    async fn test_structured_reply_without_cards_triggers_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![
            text_reply("Here are some flashcards for you!"),
            text_reply(r#"[{"front": "Q?", "back": "A"}]"#),
        ]);

        let response = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap();
        assert_eq!(response.generated_count, 1);
        assert_eq!(llm.calls(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_http_error_propagates_without_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![Err(LlmError::Http { status: 503, body: "overloaded".into() })]);

        let err = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap_err();

        assert!(matches!(err, AppError::Upstream(LlmError::Http { status: 503, .. })));
        assert_eq!(llm.calls(), vec![true]);

        let logs = store.error_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_code, "LLM_HTTP_ERROR");
        assert_eq!(logs[0].model, "test-model");

        // The generation row stays at its initial counts
        assert!(!store.generations()[0].is_finalized());
    }

    #[tokio::test]
    async fn test_unparsable_fallback_is_invalid_response() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![rejected(), text_reply("Sorry, I cannot do that.")]);

        let err = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap_err();

        assert!(matches!(err, AppError::Upstream(LlmError::InvalidResponse(_))));
        assert_eq!(store.error_logs()[0].error_code, "LLM_INVALID_RESPONSE");
    }

    #[tokio::test]
    async fn test_record_failure_skips_llm_and_is_logged() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_on(StoreOp::InsertGeneration);
        let llm = ScriptedChat::new(vec![]);

        let err = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap_err();

        assert!(matches!(err, AppError::Persistence { .. }));
        assert!(llm.calls().is_empty());
        assert_eq!(store.error_logs()[0].error_code, "PERSISTENCE_ERROR");
    }

    #[tokio::test]
    async fn test_finalize_failure_is_logged() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_on(StoreOp::FinalizeGeneration);
        let llm = ScriptedChat::new(vec![json_reply(serde_json::json!({ "flashcards": [] }))]);

        let err = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap_err();

        assert_eq!(error_code(&err), "PERSISTENCE_ERROR");
        assert_eq!(store.error_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_error_log_failure_keeps_original_error() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_on(StoreOp::InsertErrorLog);
        let llm = ScriptedChat::new(vec![Err(LlmError::InvalidResponse("empty".into()))]);

        let err = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap_err();

        assert!(matches!(err, AppError::Upstream(LlmError::InvalidResponse(_))));
        assert!(store.error_logs().is_empty());
    }

    #[tokio::test]
    async fn test_blank_cards_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let llm = ScriptedChat::new(vec![json_reply(serde_json::json!({
            "flashcards": [
                { "front": "Kept?", "back": "Yes" },
                { "front": "  ", "back": "No front" },
                { "front": "No back", "back": "" },
                { "back": "Missing front" }
            ]
        }))]);

        let response = service(&store, &llm).generate(Uuid::new_v4(), &source_text()).await.unwrap();

        assert_eq!(response.generated_count, 1);
        assert_eq!(response.flashcards_proposals[0].front, "Kept?");
        assert_eq!(store.generations()[0].generated_count, 1);
    }
}
