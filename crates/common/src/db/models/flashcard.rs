//! Flashcard entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a flashcard came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "kebab-case")]
pub enum FlashcardSource {
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "ai-full")]
    AiFull,
    #[sea_orm(string_value = "ai-edited")]
    AiEdited,
}

impl FlashcardSource {
    /// AI-derived cards must reference the generation they came from
    pub fn requires_generation(&self) -> bool {
        !matches!(self, FlashcardSource::Manual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlashcardSource::Manual => "manual",
            FlashcardSource::AiFull => "ai-full",
            FlashcardSource::AiEdited => "ai-edited",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "flashcards")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub user_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub front: String,

    #[sea_orm(column_type = "Text")]
    pub back: String,

    pub source: FlashcardSource,

    pub generation_id: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::generation::Entity",
        from = "Column::GenerationId",
        to = "super::generation::Column::Id",
        on_delete = "SetNull"
    )]
    Generation,
}

impl Related<super::generation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Generation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
