//! API handlers module

pub mod auth;
pub mod flashcards;
pub mod generations;
pub mod health;
