//! `scrumai-ai`
//!
//! **Responsibility:** the insight-provider boundary.
//!
//! - One capability (`InsightProvider`) with interchangeable backends.
//! - The backend is picked once at startup from configuration (`InsightBackend`);
//!   the analysis pipeline never knows which one is active.
//! - Providers produce free text (insights) or parsed task lists; they never
//!   touch storage.

pub mod backend;
pub mod gemini;
pub mod huggingface;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod result;

pub use backend::{AiSettings, InsightBackend, ProviderKind};
pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;
pub use mock::MockProvider;
pub use openai::OpenAiCompatible;
pub use provider::InsightProvider;
pub use result::{AiError, ParsedStandup};
