//! Request payload schemas
//!
//! Every payload the HTTP boundary accepts is decoded and checked here.
//! Failures are always [`AppError::Validation`] carrying a map of field path
//! to messages, so malformed JSON, wrong types and rule violations all reach
//! the client in the same shape.

use crate::db::models::FlashcardSource;
use crate::errors::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

pub const SOURCE_TEXT_MIN_CHARS: usize = 1000;
pub const SOURCE_TEXT_MAX_CHARS: usize = 10000;
pub const MAX_FLASHCARDS_PER_REQUEST: usize = 50;
pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 50;

/// Whether `text` has an acceptable length for generation
pub fn source_text_length_ok(text: &str) -> bool {
    (SOURCE_TEXT_MIN_CHARS..=SOURCE_TEXT_MAX_CHARS).contains(&text.chars().count())
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Login,
    Register,
}

/// Combined login/register form
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AuthRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,

    #[validate(length(min = 6, max = 100, message = "Password must be between 6 and 100 characters"))]
    pub password: String,

    #[validate(custom(function = "validate_auth_mode"))]
    pub mode: String,
}

impl AuthRequest {
    pub fn mode(&self) -> AuthMode {
        if self.mode == "register" {
            AuthMode::Register
        } else {
            AuthMode::Login
        }
    }
}

fn validate_auth_mode(mode: &str) -> std::result::Result<(), ValidationError> {
    match mode {
        "login" | "register" => Ok(()),
        _ => Err(rule("mode", "Mode must be either 'login' or 'register'")),
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,

    #[validate(length(min = 6, max = 100, message = "Password must be between 6 and 100 characters"))]
    pub password: String,
}

// ============================================================================
// Flashcards
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FlashcardCreateDto {
    #[validate(length(min = 3, max = 200, message = "Front text must be between 3 and 200 characters"))]
    pub front: String,

    #[validate(length(min = 3, max = 500, message = "Back text must be between 3 and 500 characters"))]
    pub back: String,

    pub source: FlashcardSource,

    #[validate(range(min = 1, message = "Generation ID must be a positive integer"))]
    pub generation_id: Option<i64>,
}

/// Batch create payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FlashcardsCreateCommand {
    #[validate(
        length(min = 1, max = 50, message = "Between 1 and 50 flashcards per request"),
        nested,
        custom(function = "validate_batch_consistency")
    )]
    pub flashcards: Vec<FlashcardCreateDto>,
}

/// One source per batch; manual cards carry no generation, AI cards all
/// carry the same one.
fn validate_batch_consistency(cards: &[FlashcardCreateDto]) -> std::result::Result<(), ValidationError> {
    let Some(first) = cards.first() else {
        return Ok(());
    };

    if cards.iter().any(|c| c.source != first.source) {
        return Err(rule("same_source", "All flashcards must have the same source type"));
    }

    let consistent = if first.source.requires_generation() {
        first.generation_id.is_some() && cards.iter().all(|c| c.generation_id == first.generation_id)
    } else {
        cards.iter().all(|c| c.generation_id.is_none())
    };

    if !consistent {
        return Err(rule(
            "generation_id",
            "AI-generated flashcards must have the same generation_id, manual flashcards must have null generation_id",
        ));
    }
    Ok(())
}

/// Partial update; `generation_id` tells "absent" (`None`) from an explicit
/// `null` (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_update_pairing"))]
pub struct FlashcardUpdateDto {
    #[validate(length(min = 3, max = 200, message = "Front text must be between 3 and 200 characters"))]
    pub front: Option<String>,

    #[validate(length(min = 3, max = 500, message = "Back text must be between 3 and 500 characters"))]
    pub back: Option<String>,

    pub source: Option<FlashcardSource>,

    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<Option<i64>>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn validate_update_pairing(dto: &FlashcardUpdateDto) -> std::result::Result<(), ValidationError> {
    if let Some(Some(id)) = dto.generation_id {
        if id < 1 {
            return Err(rule("range", "Generation ID must be a positive integer"));
        }
    }

    match (dto.source, dto.generation_id) {
        (Some(FlashcardSource::Manual), Some(Some(_))) => Err(rule(
            "generation_id",
            "Manual flashcards must have null generation_id",
        )),
        (Some(source), Some(None)) if source.requires_generation() => Err(rule(
            "generation_id",
            "AI-generated flashcards must reference a generation",
        )),
        _ => Ok(()),
    }
}

// ============================================================================
// Generation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateFlashcardsCommand {
    #[validate(custom(function = "validate_source_text_length"))]
    pub source_text: String,
}

fn validate_source_text_length(text: &str) -> std::result::Result<(), ValidationError> {
    let length = text.chars().count();
    if length < SOURCE_TEXT_MIN_CHARS {
        return Err(rule("length", "Source text must be at least 1000 characters long"));
    }
    if length > SOURCE_TEXT_MAX_CHARS {
        return Err(rule("length", "Source text cannot exceed 10000 characters"));
    }
    Ok(())
}

// ============================================================================
// Listing
// ============================================================================

/// Raw `?page=&limit=` values; never rejected
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListQuery {
    /// `(page, limit)` with page >= 1 and limit in `1..=50`
    pub fn pagination(&self) -> (u64, u64) {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p as u64)
            .unwrap_or(1);

        let limit = self
            .limit
            .as_deref()
            .and_then(|l| l.trim().parse::<i64>().ok())
            .map(|l| l.clamp(1, MAX_PAGE_LIMIT as i64) as u64)
            .unwrap_or(DEFAULT_PAGE_LIMIT);

        (page, limit)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Decode and validate a JSON body
pub fn parse_payload<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = serde_json::from_slice(body)
        .map_err(|e| AppError::validation("Invalid request body", "body", e.to_string()))?;

    payload.validate().map_err(into_app_error)?;
    Ok(payload)
}

/// Parse a path identifier into a positive flashcard id
pub fn parse_flashcard_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            AppError::validation(
                "Invalid flashcard ID",
                "id",
                "Flashcard ID must be a positive integer",
            )
        })
}

/// Convert validator output into the field -> messages shape
pub fn into_app_error(errors: ValidationErrors) -> AppError {
    let mut fields = Map::new();
    collect_messages(&errors, "", &mut fields);

    AppError::Validation {
        message: "Invalid input data".to_string(),
        details: Some(Value::Object(fields)),
    }
}

fn collect_messages(errors: &ValidationErrors, prefix: &str, out: &mut Map<String, Value>) {
    for (field, kind) in errors.errors() {
        let name: &str = field.as_ref();
        let path = match (prefix.is_empty(), name) {
            (true, "__all__") => "body".to_string(),
            (false, "__all__") => prefix.to_string(),
            (true, name) => name.to_string(),
            (false, name) => format!("{}.{}", prefix, name),
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                let entry = out.entry(path).or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(messages) = entry {
                    messages.extend(list.iter().map(|e| Value::String(describe(e))));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_messages(inner, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

fn describe(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| format!("Invalid value ({})", error.code))
}

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}
