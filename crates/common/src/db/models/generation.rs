//! Generation entity: one AI generation attempt and its outcome metrics

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "generations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub user_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub model: String,

    /// Hex digest of the source text; the text itself is not stored
    #[sea_orm(column_type = "Text")]
    pub source_text_hash: String,

    pub source_text_length: i32,

    pub generated_count: i32,

    /// Wall-clock duration in milliseconds
    pub generation_duration: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the attempt reached the finalize step
    pub fn is_finalized(&self) -> bool {
        self.generation_duration > 0 || self.generated_count > 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::flashcard::Entity")]
    Flashcards,
}

impl Related<super::flashcard::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Flashcards.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
