//! Authentication handlers
//!
//! Thin wrappers over the configured identity provider.

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::extract::ValidatedJson;
use crate::AppState;
use cardforge_common::{
    auth::AuthContext,
    errors::Result,
    validation::{AuthMode, AuthRequest, RegisterRequest},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: Uuid,
    /// Absent when a new account still awaits email confirmation
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub data: SessionData,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationData {
    pub user_id: Uuid,
    pub email: String,
    pub needs_confirmation: bool,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub data: RegistrationData,
    pub message: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Log in, or register and log in, depending on `mode`
pub async fn authenticate(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<AuthRequest>,
) -> Result<Json<AuthResponse>> {
    let data = match request.mode() {
        AuthMode::Login => {
            let session = state.auth.sign_in(&request.email, &request.password).await?;
            SessionData {
                user_id: session.user_id,
                token: Some(session.access_token),
            }
        }
        AuthMode::Register => {
            let outcome = state.auth.sign_up(&request.email, &request.password).await?;
            SessionData {
                user_id: outcome.user_id,
                token: outcome.session.map(|s| s.access_token),
            }
        }
    };

    tracing::info!(user_id = %data.user_id, mode = ?request.mode(), "User authenticated");

    Ok(Json(AuthResponse { success: true, data }))
}

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    let outcome = state.auth.sign_up(&request.email, &request.password).await?;
    let needs_confirmation = outcome.needs_confirmation();

    tracing::info!(user_id = %outcome.user_id, needs_confirmation, "User registered");

    let message = if needs_confirmation {
        "Registration successful. Please check your email to confirm your account."
    } else {
        "Registration successful."
    };

    Ok(Json(RegisterResponse {
        success: true,
        data: RegistrationData {
            user_id: outcome.user_id,
            email: outcome.email,
            needs_confirmation,
        },
        message: message.to_string(),
    }))
}

pub async fn logout(State(state): State<AppState>, auth: AuthContext) -> Result<Json<MessageResponse>> {
    state.auth.sign_out(&auth.token).await?;

    tracing::info!(user_id = %auth.user_id, request_id = %auth.request_id, "User logged out");

    Ok(Json(MessageResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}
