//! Generation handler
//!
//! The attempt runs on its own task and the response waits at most
//! `generation.timeout_ms`. A timed-out task is left to finish in the
//! background; its store writes may still land after the 504.

use axum::{extract::State, Json};

use crate::extract::ValidatedJson;
use crate::AppState;
use cardforge_common::{
    auth::AuthContext,
    errors::{AppError, Result},
    generation::{GenerateCreateResponse, GenerationService},
    validation::GenerateFlashcardsCommand,
};

pub async fn create_generation(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(command): ValidatedJson<GenerateFlashcardsCommand>,
) -> Result<Json<GenerateCreateResponse>> {
    let service = GenerationService::new(state.store.clone(), state.llm.clone());
    let timeout = state.config.generation.timeout();
    let user_id = auth.user_id;

    let attempt = tokio::spawn(async move { service.generate(user_id, &command.source_text).await });

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(result)) => result.map(Json),
        Ok(Err(join_error)) => Err(AppError::Internal {
            message: format!("Generation task failed: {}", join_error),
        }),
        Err(_) => {
            tracing::warn!(
                user_id = %user_id,
                request_id = %auth.request_id,
                timeout_ms = state.config.generation.timeout_ms,
                "Generation timed out"
            );
            Err(AppError::GenerationTimeout {
                timeout_ms: state.config.generation.timeout_ms,
            })
        }
    }
}
