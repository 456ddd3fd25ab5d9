//! Repository pattern for database operations
//!
//! Postgres-backed implementation of [`Store`] with owner filters on every
//! flashcard query and a transaction around batch inserts.

use crate::db::models::*;
use crate::db::store::{
    FlashcardChanges, FlashcardPage, NewFlashcard, NewGeneration, NewGenerationErrorLog, Store,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl Store for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Generation Operations
    // ========================================================================

    async fn insert_generation(&self, generation: NewGeneration) -> Result<Generation> {
        let now = chrono::Utc::now();

        let row = GenerationActiveModel {
            user_id: Set(generation.user_id),
            model: Set(generation.model),
            source_text_hash: Set(generation.source_text_hash),
            source_text_length: Set(generation.source_text_length),
            generated_count: Set(0),
            generation_duration: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn finalize_generation(
        &self,
        id: i64,
        generated_count: i32,
        generation_duration_ms: i32,
    ) -> Result<()> {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();

        let result = GenerationEntity::update_many()
            .col_expr(GenerationColumn::GeneratedCount, Expr::value(generated_count))
            .col_expr(GenerationColumn::GenerationDuration, Expr::value(generation_duration_ms))
            .col_expr(GenerationColumn::UpdatedAt, Expr::value(now))
            .filter(GenerationColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::not_found("Generation", id));
        }
        Ok(())
    }

    async fn find_generation(&self, id: i64) -> Result<Option<Generation>> {
        GenerationEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_generation_error_log(&self, log: NewGenerationErrorLog) -> Result<()> {
        let row = GenerationErrorLogActiveModel {
            user_id: Set(log.user_id),
            error_code: Set(log.error_code),
            error_message: Set(log.error_message),
            model: Set(log.model),
            source_text_hash: Set(log.source_text_hash),
            source_text_length: Set(log.source_text_length),
            created_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        };

        row.insert(self.write_conn()).await?;
        Ok(())
    }

    // ========================================================================
    // Flashcard Operations
    // ========================================================================

    async fn insert_flashcards(
        &self,
        user_id: Uuid,
        flashcards: Vec<NewFlashcard>,
    ) -> Result<Vec<Flashcard>> {
        let now = chrono::Utc::now();
        let txn = self.write_conn().begin().await?;

        let mut created = Vec::with_capacity(flashcards.len());
        for card in flashcards {
            let row = FlashcardActiveModel {
                user_id: Set(user_id),
                front: Set(card.front),
                back: Set(card.back),
                source: Set(card.source),
                generation_id: Set(card.generation_id),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
                ..Default::default()
            };
            // Dropping the transaction on error rolls it back
            created.push(row.insert(&txn).await?);
        }

        txn.commit().await?;
        Ok(created)
    }

    async fn list_flashcards(&self, user_id: Uuid, page: u64, limit: u64) -> Result<FlashcardPage> {
        let paginator = FlashcardEntity::find()
            .filter(FlashcardColumn::UserId.eq(user_id))
            .order_by_desc(FlashcardColumn::CreatedAt)
            .order_by_desc(FlashcardColumn::Id)
            .paginate(self.read_conn(), limit);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(FlashcardPage { items, total })
    }

    async fn find_flashcard(&self, user_id: Uuid, id: i64) -> Result<Option<Flashcard>> {
        FlashcardEntity::find_by_id(id)
            .filter(FlashcardColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_flashcard(
        &self,
        user_id: Uuid,
        id: i64,
        changes: FlashcardChanges,
    ) -> Result<Option<Flashcard>> {
        let Some(existing) = FlashcardEntity::find_by_id(id)
            .filter(FlashcardColumn::UserId.eq(user_id))
            .one(self.write_conn())
            .await?
        else {
            return Ok(None);
        };

        let mut row: FlashcardActiveModel = existing.into();
        if let Some(front) = changes.front {
            row.front = Set(front);
        }
        if let Some(back) = changes.back {
            row.back = Set(back);
        }
        if let Some(source) = changes.source {
            row.source = Set(source);
        }
        if let Some(generation_id) = changes.generation_id {
            row.generation_id = Set(generation_id);
        }
        row.updated_at = Set(chrono::Utc::now().into());

        row.update(self.write_conn()).await.map(Some).map_err(Into::into)
    }

    async fn delete_flashcard(&self, user_id: Uuid, id: i64) -> Result<bool> {
        let result = FlashcardEntity::delete_many()
            .filter(FlashcardColumn::Id.eq(id))
            .filter(FlashcardColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}
