//! In-process store
//!
//! Keeps tables in memory behind a mutex. Used by tests and by local runs
//! with `database.url = "memory://"`. Individual operations can be told to
//! fail so that error paths can be exercised.

use crate::db::models::{Flashcard, Generation, GenerationErrorLog};
use crate::db::store::{
    FlashcardChanges, FlashcardPage, NewFlashcard, NewGeneration, NewGenerationErrorLog, Store,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Store operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertGeneration,
    FinalizeGeneration,
    InsertErrorLog,
    InsertFlashcards,
    ListFlashcards,
}

#[derive(Default)]
struct Tables {
    generations: Vec<Generation>,
    error_logs: Vec<GenerationErrorLog>,
    flashcards: Vec<Flashcard>,
    next_id: i64,
    /// Operation -> number of calls still allowed to succeed
    failing: HashMap<StoreOp, usize>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&mut self, op: StoreOp) -> Result<()> {
        if let Some(allowed) = self.failing.get_mut(&op) {
            if *allowed > 0 {
                *allowed -= 1;
                return Ok(());
            }
            return Err(AppError::Persistence {
                message: format!("Store operation {:?} failed", op),
                details: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Mutex-backed store
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| AppError::Internal {
            message: "in-memory store lock poisoned".to_string(),
        })
    }

    /// Make every subsequent call of `op` fail with a persistence error
    pub fn fail_on(&self, op: StoreOp) {
        self.fail_after(op, 0);
    }

    /// Let `successes` calls of `op` through, then fail every later one
    pub fn fail_after(&self, op: StoreOp, successes: usize) {
        if let Ok(mut tables) = self.tables() {
            tables.failing.insert(op, successes);
        }
    }

    /// Insert a generation owned by `user_id` directly (fixtures)
    pub fn seed_generation(&self, user_id: Uuid) -> Result<Generation> {
        let mut tables = self.tables()?;
        let now = Utc::now().into();
        let generation = Generation {
            id: tables.next_id(),
            user_id,
            model: "seed".to_string(),
            source_text_hash: String::new(),
            source_text_length: 0,
            generated_count: 0,
            generation_duration: 0,
            created_at: now,
            updated_at: now,
        };
        tables.generations.push(generation.clone());
        Ok(generation)
    }

    pub fn generations(&self) -> Vec<Generation> {
        self.tables().map(|t| t.generations.clone()).unwrap_or_default()
    }

    pub fn error_logs(&self) -> Vec<GenerationErrorLog> {
        self.tables().map(|t| t.error_logs.clone()).unwrap_or_default()
    }

    pub fn flashcards(&self) -> Vec<Flashcard> {
        self.tables().map(|t| t.flashcards.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        self.tables().map(|_| ())
    }

    async fn insert_generation(&self, generation: NewGeneration) -> Result<Generation> {
        let mut tables = self.tables()?;
        tables.check(StoreOp::InsertGeneration)?;

        let now = Utc::now().into();
        let row = Generation {
            id: tables.next_id(),
            user_id: generation.user_id,
            model: generation.model,
            source_text_hash: generation.source_text_hash,
            source_text_length: generation.source_text_length,
            generated_count: 0,
            generation_duration: 0,
            created_at: now,
            updated_at: now,
        };
        tables.generations.push(row.clone());
        Ok(row)
    }

    async fn finalize_generation(
        &self,
        id: i64,
        generated_count: i32,
        generation_duration_ms: i32,
    ) -> Result<()> {
        let mut tables = self.tables()?;
        tables.check(StoreOp::FinalizeGeneration)?;

        let row = tables
            .generations
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| AppError::not_found("Generation", id))?;
        row.generated_count = generated_count;
        row.generation_duration = generation_duration_ms;
        row.updated_at = Utc::now().into();
        Ok(())
    }

    async fn find_generation(&self, id: i64) -> Result<Option<Generation>> {
        let tables = self.tables()?;
        Ok(tables.generations.iter().find(|g| g.id == id).cloned())
    }

    async fn insert_generation_error_log(&self, log: NewGenerationErrorLog) -> Result<()> {
        let mut tables = self.tables()?;
        tables.check(StoreOp::InsertErrorLog)?;

        let row = GenerationErrorLog {
            id: tables.next_id(),
            user_id: log.user_id,
            error_code: log.error_code,
            error_message: log.error_message,
            model: log.model,
            source_text_hash: log.source_text_hash,
            source_text_length: log.source_text_length,
            created_at: Utc::now().into(),
        };
        tables.error_logs.push(row);
        Ok(())
    }

    async fn insert_flashcards(
        &self,
        user_id: Uuid,
        flashcards: Vec<NewFlashcard>,
    ) -> Result<Vec<Flashcard>> {
        let mut tables = self.tables()?;
        tables.check(StoreOp::InsertFlashcards)?;

        let now = Utc::now().into();
        let mut created = Vec::with_capacity(flashcards.len());
        for card in flashcards {
            created.push(Flashcard {
                id: tables.next_id(),
                user_id,
                front: card.front,
                back: card.back,
                source: card.source,
                generation_id: card.generation_id,
                created_at: now,
                updated_at: now,
            });
        }
        tables.flashcards.extend(created.iter().cloned());
        Ok(created)
    }

    async fn list_flashcards(&self, user_id: Uuid, page: u64, limit: u64) -> Result<FlashcardPage> {
        let mut tables = self.tables()?;
        tables.check(StoreOp::ListFlashcards)?;

        let mut owned: Vec<&Flashcard> =
            tables.flashcards.iter().filter(|f| f.user_id == user_id).collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = owned.len() as u64;
        let offset = page.saturating_sub(1).saturating_mul(limit);
        let items = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(FlashcardPage { items, total })
    }

    async fn find_flashcard(&self, user_id: Uuid, id: i64) -> Result<Option<Flashcard>> {
        let tables = self.tables()?;
        Ok(tables
            .flashcards
            .iter()
            .find(|f| f.id == id && f.user_id == user_id)
            .cloned())
    }

    async fn update_flashcard(
        &self,
        user_id: Uuid,
        id: i64,
        changes: FlashcardChanges,
    ) -> Result<Option<Flashcard>> {
        let mut tables = self.tables()?;
        let Some(row) = tables
            .flashcards
            .iter_mut()
            .find(|f| f.id == id && f.user_id == user_id)
        else {
            return Ok(None);
        };

        if let Some(front) = changes.front {
            row.front = front;
        }
        if let Some(back) = changes.back {
            row.back = back;
        }
        if let Some(source) = changes.source {
            row.source = source;
        }
        if let Some(generation_id) = changes.generation_id {
            row.generation_id = generation_id;
        }
        row.updated_at = Utc::now().into();
        Ok(Some(row.clone()))
    }

    async fn delete_flashcard(&self, user_id: Uuid, id: i64) -> Result<bool> {
        let mut tables = self.tables()?;
        let before = tables.flashcards.len();
        tables.flashcards.retain(|f| !(f.id == id && f.user_id == user_id));
        Ok(tables.flashcards.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::FlashcardSource;

    fn manual(front: &str) -> NewFlashcard {
        NewFlashcard {
            front: front.to_string(),
            back: "answer".to_string(),
            source: FlashcardSource::Manual,
            generation_id: None,
        }
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_newest_first() {
        let store = InMemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.insert_flashcards(alice, vec![manual("first")]).await.unwrap();
        store.insert_flashcards(alice, vec![manual("second")]).await.unwrap();
        store.insert_flashcards(bob, vec![manual("other")]).await.unwrap();

        let page = store.list_flashcards(alice, 1, 20).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].front, "second");
        assert_eq!(page.items[1].front, "first");
    }

    #[tokio::test]
    async fn test_injected_failure_inserts_nothing() {
        let store = InMemoryStore::new();
        store.fail_on(StoreOp::InsertFlashcards);

        let result = store
            .insert_flashcards(Uuid::new_v4(), vec![manual("a"), manual("b")])
            .await;

        assert!(matches!(result, Err(AppError::Persistence { .. })));
        assert!(store.flashcards().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_require_owner() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let card = store.insert_flashcards(owner, vec![manual("q")]).await.unwrap().remove(0);

        let stranger = Uuid::new_v4();
        let changes = FlashcardChanges {
            front: Some("hijacked".to_string()),
            ..Default::default()
        };
        assert!(store.update_flashcard(stranger, card.id, changes).await.unwrap().is_none());
        assert!(!store.delete_flashcard(stranger, card.id).await.unwrap());
        assert!(store.delete_flashcard(owner, card.id).await.unwrap());
    }
}
