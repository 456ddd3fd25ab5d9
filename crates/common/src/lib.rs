//! CardForge Common Library
//!
//! Shared code for the CardForge service including:
//! - Database models, the `Store` interface and its implementations
//! - LLM gateway client abstraction
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability
//! - Generation, flashcard and proposal review services

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod flashcards;
pub mod generation;
pub mod llm;
pub mod metrics;
pub mod review;
pub mod validation;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Store;
pub use errors::{AppError, Result};
pub use flashcards::FlashcardService;
pub use generation::GenerationService;
pub use llm::ChatCompletion;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
