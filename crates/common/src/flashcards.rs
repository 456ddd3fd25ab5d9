//! Flashcard CRUD service
//!
//! Every operation is scoped to the calling user. Cards owned by someone
//! else are reported as missing, never as forbidden, so ids do not leak.
//! Generations referenced by AI cards must exist (404) and belong to the
//! caller (403).

use crate::db::models::{Flashcard, FlashcardSource};
use crate::db::{FlashcardChanges, NewFlashcard, Store};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::validation::{FlashcardCreateDto, FlashcardUpdateDto, DEFAULT_PAGE_LIMIT, MAX_FLASHCARDS_PER_REQUEST, MAX_PAGE_LIMIT};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Flashcard as returned to clients (owner omitted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardDto {
    pub id: i64,
    pub front: String,
    pub back: String,
    pub source: FlashcardSource,
    pub generation_id: Option<i64>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl From<Flashcard> for FlashcardDto {
    fn from(row: Flashcard) -> Self {
        Self {
            id: row.id,
            front: row.front,
            back: row.back,
            source: row.source,
            generation_id: row.generation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationDto {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardsListResponse {
    pub data: Vec<FlashcardDto>,
    pub pagination: PaginationDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFlashcardsResponse {
    pub flashcards: Vec<FlashcardDto>,
}

/// Re-wrap a store failure under an operation-specific message, keeping the
/// underlying cause as details
fn store_failure(message: &'static str) -> impl FnOnce(AppError) -> AppError {
    move |err| match err {
        AppError::Database(_) | AppError::Persistence { .. } => {
            error!(error = %err, "{}", message);
            let details = err
                .details()
                .and_then(|d| d.as_str().map(String::from))
                .unwrap_or_default();
            AppError::Persistence {
                message: message.to_string(),
                details,
            }
        }
        other => other,
    }
}

pub struct FlashcardService {
    store: Arc<dyn Store>,
}

impl FlashcardService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The generation must exist and belong to `user_id`
    async fn ensure_generation_owned(&self, user_id: Uuid, generation_id: i64) -> Result<()> {
        let generation = self
            .store
            .find_generation(generation_id)
            .await
            .map_err(store_failure("Failed to verify generation"))?;

        match generation {
            None => Err(AppError::not_found("Generation", generation_id)),
            Some(g) if g.user_id != user_id => Err(AppError::Forbidden {
                message: format!("Generation with ID {} does not belong to this user", generation_id),
            }),
            Some(_) => Ok(()),
        }
    }

    async fn find_owned(&self, user_id: Uuid, id: i64) -> Result<Flashcard> {
        self.store
            .find_flashcard(user_id, id)
            .await
            .map_err(store_failure("Failed to retrieve flashcard"))?
            .ok_or_else(|| AppError::not_found("Flashcard", id))
    }

    /// Insert a batch all-or-nothing
    pub async fn create_flashcards(
        &self,
        user_id: Uuid,
        flashcards: Vec<FlashcardCreateDto>,
    ) -> Result<CreateFlashcardsResponse> {
        let Some(first) = flashcards.first() else {
            return Err(AppError::validation(
                "No flashcards to create",
                "flashcards",
                "At least one flashcard is required",
            ));
        };
        if flashcards.len() > MAX_FLASHCARDS_PER_REQUEST {
            return Err(AppError::validation(
                "Too many flashcards",
                "flashcards",
                "Maximum 50 flashcards per request",
            ));
        }

        let source = first.source;
        if source.requires_generation() {
            let generation_id = first.generation_id.ok_or_else(|| {
                AppError::validation(
                    "AI-generated flashcards must reference a generation",
                    "generation_id",
                    "generation_id is required for AI-generated flashcards",
                )
            })?;
            self.ensure_generation_owned(user_id, generation_id).await?;
        }

        let rows = flashcards
            .into_iter()
            .map(|dto| NewFlashcard {
                front: dto.front,
                back: dto.back,
                source: dto.source,
                generation_id: dto.generation_id,
            })
            .collect();

        let created = self
            .store
            .insert_flashcards(user_id, rows)
            .await
            .map_err(store_failure("Failed to create flashcards"))?;

        metrics::record_flashcards_created(created.len(), source.as_str());
        debug!(user_id = %user_id, count = created.len(), source = source.as_str(), "Flashcards created");

        Ok(CreateFlashcardsResponse {
            flashcards: created.into_iter().map(FlashcardDto::from).collect(),
        })
    }

    /// Newest first; `page` is 1-based, `limit` defaults to 20 and is capped at 50
    pub async fn list_flashcards(&self, user_id: Uuid, page: u64, limit: u64) -> Result<FlashcardsListResponse> {
        let page = page.max(1);
        let limit = match limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        };

        let result = self
            .store
            .list_flashcards(user_id, page, limit)
            .await
            .map_err(store_failure("Failed to retrieve flashcards"))?;

        Ok(FlashcardsListResponse {
            data: result.items.into_iter().map(FlashcardDto::from).collect(),
            pagination: PaginationDto {
                page,
                limit,
                total: result.total,
            },
        })
    }

    pub async fn get_flashcard(&self, user_id: Uuid, id: i64) -> Result<FlashcardDto> {
        self.find_owned(user_id, id).await.map(FlashcardDto::from)
    }

    /// Partial update; returns the fresh row
    pub async fn update_flashcard(
        &self,
        user_id: Uuid,
        id: i64,
        patch: FlashcardUpdateDto,
    ) -> Result<FlashcardDto> {
        let current = self.find_owned(user_id, id).await?;

        if let Some(Some(generation_id)) = patch.generation_id {
            self.ensure_generation_owned(user_id, generation_id).await?;
        }

        // Source and generation must still pair up once the patch is applied
        if patch.source.is_some() || patch.generation_id.is_some() {
            let source = patch.source.unwrap_or(current.source);
            let generation_id = patch.generation_id.unwrap_or(current.generation_id);

            match (source.requires_generation(), generation_id) {
                (false, Some(_)) => {
                    return Err(AppError::validation(
                        "Manual flashcards must have null generation_id",
                        "generation_id",
                        "must be null for manual flashcards",
                    ))
                }
                (true, None) => {
                    return Err(AppError::validation(
                        "AI-generated flashcards must reference a generation",
                        "generation_id",
                        "is required for AI-generated flashcards",
                    ))
                }
                _ => {}
            }
        }

        let changes = FlashcardChanges {
            front: patch.front,
            back: patch.back,
            source: patch.source,
            generation_id: patch.generation_id,
        };

        self.store
            .update_flashcard(user_id, id, changes)
            .await
            .map_err(store_failure("Failed to update flashcard"))?
            .map(FlashcardDto::from)
            .ok_or_else(|| AppError::not_found("Flashcard", id))
    }

    pub async fn delete_flashcard(&self, user_id: Uuid, id: i64) -> Result<()> {
        self.find_owned(user_id, id).await?;

        let removed = self
            .store
            .delete_flashcard(user_id, id)
            .await
            .map_err(store_failure("Failed to delete flashcard"))?;

        if !removed {
            return Err(AppError::not_found("Flashcard", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, StoreOp};
    use axum::http::StatusCode;

    fn dto(front: &str, source: FlashcardSource, generation_id: Option<i64>) -> FlashcardCreateDto {
        FlashcardCreateDto {
            front: front.to_string(),
            back: "An answer".to_string(),
            source,
            generation_id,
        }
    }

    fn setup() -> (Arc<InMemoryStore>, FlashcardService) {
        let store = Arc::new(InMemoryStore::new());
        let service = FlashcardService::new(store.clone());
        (store, service)
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (_, service) = setup();
        let user = Uuid::new_v4();

        let created = service
            .create_flashcards(user, vec![dto("What is Rust?", FlashcardSource::Manual, None)])
            .await
            .unwrap();
        let card = &created.flashcards[0];

        let fetched = service.get_flashcard(user, card.id).await.unwrap();
        assert_eq!(&fetched, card);
        assert_eq!(fetched.source, FlashcardSource::Manual);
        assert_eq!(fetched.generation_id, None);
    }

    #[tokio::test]
    async fn test_ai_batch_checks_generation() {
        let (store, service) = setup();
        let owner = Uuid::new_v4();
        let generation = store.seed_generation(owner).unwrap();

        let missing = service
            .create_flashcards(owner, vec![dto("Question?", FlashcardSource::AiFull, Some(999))])
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "Generation with ID 999 not found");

        let stranger = Uuid::new_v4();
        let foreign = service
            .create_flashcards(stranger, vec![dto("Question?", FlashcardSource::AiFull, Some(generation.id))])
            .await
            .unwrap_err();
        assert_eq!(foreign.status_code(), StatusCode::FORBIDDEN);
        assert!(store.flashcards().is_empty());

        let ok = service
            .create_flashcards(
                owner,
                vec![
                    dto("First?", FlashcardSource::AiFull, Some(generation.id)),
                    dto("Second?", FlashcardSource::AiFull, Some(generation.id)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ok.flashcards.len(), 2);
        assert!(ok.flashcards.iter().all(|c| c.generation_id == Some(generation.id)));
    }

    #[tokio::test]
    async fn test_empty_batch_and_insert_failure() {
        let (store, service) = setup();
        let user = Uuid::new_v4();

        let empty = service.create_flashcards(user, vec![]).await.unwrap_err();
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

        store.fail_on(StoreOp::InsertFlashcards);
        let err = service
            .create_flashcards(user, vec![dto("Question?", FlashcardSource::Manual, None)])
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to create flashcards");
        assert_eq!(err.details(), Some(serde_json::json!("injected failure")));
        assert!(store.flashcards().is_empty());
    }

    #[tokio::test]
    async fn test_pagination_bounds() {
        let (_, service) = setup();
        let user = Uuid::new_v4();
        for i in 0..25 {
            service
                .create_flashcards(user, vec![dto(&format!("Card {}", i), FlashcardSource::Manual, None)])
                .await
                .unwrap();
        }

        let first = service.list_flashcards(user, 1, 10).await.unwrap();
        assert_eq!(first.data.len(), 10);
        assert_eq!(first.data[0].front, "Card 24");
        assert_eq!(first.pagination, PaginationDto { page: 1, limit: 10, total: 25 });

        let last = service.list_flashcards(user, 3, 10).await.unwrap();
        assert_eq!(last.data.len(), 5);

        let beyond = service.list_flashcards(user, 9, 10).await.unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.pagination.total, 25);

        let capped = service.list_flashcards(user, 0, 500).await.unwrap();
        assert_eq!(capped.pagination.page, 1);
        assert_eq!(capped.pagination.limit, 50);
        assert_eq!(capped.data.len(), 25);

        let defaulted = service.list_flashcards(user, 1, 0).await.unwrap();
        assert_eq!(defaulted.pagination.limit, 20);
    }

    #[tokio::test]
    async fn test_foreign_cards_look_missing() {
        let (_, service) = setup();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let card = service
            .create_flashcards(owner, vec![dto("Private?", FlashcardSource::Manual, None)])
            .await
            .unwrap()
            .flashcards
            .remove(0);

        for err in [
            service.get_flashcard(stranger, card.id).await.unwrap_err(),
            service.update_flashcard(stranger, card.id, FlashcardUpdateDto::default()).await.unwrap_err(),
            service.delete_flashcard(stranger, card.id).await.unwrap_err(),
        ] {
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
            assert_eq!(err.to_string(), format!("Flashcard with ID {} not found", card.id));
        }
    }

    #[tokio::test]
    async fn test_update_checks_merged_pairing() {
        let (store, service) = setup();
        let user = Uuid::new_v4();
        let generation = store.seed_generation(user).unwrap();
        let foreign_generation = store.seed_generation(Uuid::new_v4()).unwrap();
        let card = service
            .create_flashcards(user, vec![dto("Original?", FlashcardSource::AiFull, Some(generation.id))])
            .await
            .unwrap()
            .flashcards
            .remove(0);

        let edited = service
            .update_flashcard(
                user,
                card.id,
                FlashcardUpdateDto {
                    front: Some("Edited?".to_string()),
                    source: Some(FlashcardSource::AiEdited),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.front, "Edited?");
        assert_eq!(edited.back, card.back);
        assert_eq!(edited.source, FlashcardSource::AiEdited);
        assert_eq!(edited.generation_id, Some(generation.id));
        assert!(edited.updated_at >= card.updated_at);

        // Switching to manual while keeping the generation breaks the pairing
        let err = service
            .update_flashcard(
                user,
                card.id,
                FlashcardUpdateDto { source: Some(FlashcardSource::Manual), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let manual = service
            .update_flashcard(
                user,
                card.id,
                FlashcardUpdateDto {
                    source: Some(FlashcardSource::Manual),
                    generation_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(manual.generation_id, None);

        let err = service
            .update_flashcard(
                user,
                card.id,
                FlashcardUpdateDto {
                    source: Some(FlashcardSource::AiFull),
                    generation_id: Some(Some(foreign_generation.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let (_, service) = setup();
        let user = Uuid::new_v4();
        let card = service
            .create_flashcards(user, vec![dto("Short-lived?", FlashcardSource::Manual, None)])
            .await
            .unwrap()
            .flashcards
            .remove(0);

        service.delete_flashcard(user, card.id).await.unwrap();
        assert_eq!(
            service.get_flashcard(user, card.id).await.unwrap_err().status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            service.delete_flashcard(user, card.id).await.unwrap_err().status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
