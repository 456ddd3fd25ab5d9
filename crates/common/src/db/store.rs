//! Narrow data-store interface used by the services
//!
//! The services only ever insert, select (with owner filter and pagination),
//! update and delete rows. Both the Postgres repository and the in-memory
//! store implement this trait.

use crate::db::models::{Flashcard, FlashcardSource, Generation};
use crate::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// New generation row (counts start at zero)
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub user_id: Uuid,
    pub model: String,
    pub source_text_hash: String,
    pub source_text_length: i32,
}

/// New error log row
#[derive(Debug, Clone)]
pub struct NewGenerationErrorLog {
    pub user_id: Uuid,
    pub error_code: String,
    pub error_message: String,
    pub model: String,
    pub source_text_hash: String,
    pub source_text_length: i32,
}

/// New flashcard row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFlashcard {
    pub front: String,
    pub back: String,
    pub source: FlashcardSource,
    pub generation_id: Option<i64>,
}

/// Partial flashcard update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashcardChanges {
    pub front: Option<String>,
    pub back: Option<String>,
    pub source: Option<FlashcardSource>,
    pub generation_id: Option<Option<i64>>,
}

/// Page of flashcards plus the owner's total count
#[derive(Debug, Clone)]
pub struct FlashcardPage {
    pub items: Vec<Flashcard>,
    pub total: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    async fn insert_generation(&self, generation: NewGeneration) -> Result<Generation>;

    /// Record the proposal count and elapsed milliseconds
    async fn finalize_generation(
        &self,
        id: i64,
        generated_count: i32,
        generation_duration_ms: i32,
    ) -> Result<()>;

    /// Look a generation up by id regardless of owner
    async fn find_generation(&self, id: i64) -> Result<Option<Generation>>;

    async fn insert_generation_error_log(&self, log: NewGenerationErrorLog) -> Result<()>;

    /// Insert all rows or none
    async fn insert_flashcards(
        &self,
        user_id: Uuid,
        flashcards: Vec<NewFlashcard>,
    ) -> Result<Vec<Flashcard>>;

    /// Newest first; `page` is 1-based
    async fn list_flashcards(&self, user_id: Uuid, page: u64, limit: u64) -> Result<FlashcardPage>;

    async fn find_flashcard(&self, user_id: Uuid, id: i64) -> Result<Option<Flashcard>>;

    async fn update_flashcard(
        &self,
        user_id: Uuid,
        id: i64,
        changes: FlashcardChanges,
    ) -> Result<Option<Flashcard>>;

    /// Returns whether a row was removed
    async fn delete_flashcard(&self, user_id: Uuid, id: i64) -> Result<bool>;
}
