pub mod appointments;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod telephony;

// Re-export commonly used items for convenience
pub use crate::core::SpeechFactory;
pub use config::ServerConfig;
pub use errors::{AppError, AppResult};
pub use state::AppState;
