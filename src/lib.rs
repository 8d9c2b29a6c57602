// Core modules
pub mod api;
pub mod brain;
pub mod config;
pub mod db;
pub mod events;
pub mod execution;
pub mod indicators;
pub mod llm;
pub mod models;
pub mod service;
pub mod triggers;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;
