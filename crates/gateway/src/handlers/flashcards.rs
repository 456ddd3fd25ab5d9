//! Flashcard management handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::extract::ValidatedJson;
use crate::AppState;
use cardforge_common::{
    auth::AuthContext,
    errors::Result,
    flashcards::{CreateFlashcardsResponse, FlashcardDto, FlashcardService, FlashcardsListResponse},
    validation::{parse_flashcard_id, FlashcardUpdateDto, FlashcardsCreateCommand, ListQuery},
};

/// List the caller's flashcards, newest first
pub async fn list_flashcards(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<FlashcardsListResponse>> {
    let (page, limit) = query.pagination();
    let service = FlashcardService::new(state.store.clone());

    service.list_flashcards(auth.user_id, page, limit).await.map(Json)
}

/// Create a batch of flashcards
pub async fn create_flashcards(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(command): ValidatedJson<FlashcardsCreateCommand>,
) -> Result<(StatusCode, Json<CreateFlashcardsResponse>)> {
    let service = FlashcardService::new(state.store.clone());
    let created = service.create_flashcards(auth.user_id, command.flashcards).await?;

    tracing::info!(
        user_id = %auth.user_id,
        request_id = %auth.request_id,
        count = created.flashcards.len(),
        "Flashcards created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_flashcard(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<FlashcardDto>> {
    let id = parse_flashcard_id(&id)?;
    let service = FlashcardService::new(state.store.clone());

    service.get_flashcard(auth.user_id, id).await.map(Json)
}

pub async fn update_flashcard(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    ValidatedJson(patch): ValidatedJson<FlashcardUpdateDto>,
) -> Result<Json<FlashcardDto>> {
    let id = parse_flashcard_id(&id)?;
    let service = FlashcardService::new(state.store.clone());

    service.update_flashcard(auth.user_id, id, patch).await.map(Json)
}

pub async fn delete_flashcard(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_flashcard_id(&id)?;
    let service = FlashcardService::new(state.store.clone());

    service.delete_flashcard(auth.user_id, id).await?;

    tracing::info!(user_id = %auth.user_id, flashcard_id = id, "Flashcard deleted");
    Ok(StatusCode::NO_CONTENT)
}
