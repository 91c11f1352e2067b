//! Model transport layer
//!
//! Talks to an Ollama-compatible model server for the two calls the system needs:
//! one-shot embeddings and streamed generation.
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `LanguageModel` trait: async interface shared by the embedding and generation services
//! - `OllamaClient`: HTTP implementation (`/api/embeddings`, `/api/generate`)
//! - `MockLanguageModel`: deterministic mock with scripted failures and fragments

pub mod client;
pub mod mock;
pub mod models;
pub mod traits;

pub use client::OllamaClient;
pub use mock::MockLanguageModel;
pub use models::TransportError;
pub use traits::{FragmentLines, LanguageModel};
