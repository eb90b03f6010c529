//! Generative-AI collaborator.
//!
//! The console treats the model-serving API as an opaque remote service with
//! three call shapes: single-shot generation, streaming generation, and
//! long-running video jobs that are polled until done. [`GenerativeService`]
//! is that boundary; [`GeminiClient`] speaks the public Gemini REST API and
//! [`Assistant`] layers the console's prompts and task flows on top.
//!
//! Nothing in the sync layer depends on this module. Features that call it
//! degrade to local-only behavior when a call fails.

mod assistant;
mod error;
mod gemini;
mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use assistant::{Assistant, ChatTurn, DocumentInput};
pub use error::GenAiError;
pub use gemini::GeminiClient;
pub use types::{
    Candidate, Content, GenerateRequest, GenerateResponse, GenerationConfig, ImageConfig,
    InlineData, OperationError, Part, ThinkingConfig, VideoOperation, VideoRequest,
};

/// Incremental text chunks; the stream ends when generation completes.
pub type TextStream = BoxStream<'static, Result<String, GenAiError>>;

/// Remote model-serving API.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Single-shot generation.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, GenAiError>;

    /// Streaming generation.
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<TextStream, GenAiError>;

    /// Submit a video generation job.
    async fn submit_video(&self, request: &VideoRequest) -> Result<VideoOperation, GenAiError>;

    /// Refresh the status of a submitted video job.
    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, GenAiError>;
}

/// Model and credential settings (`[genai]` in the config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenAiConfig {
    /// API key. Calls fail with [`GenAiError::MissingApiKey`] when unset.
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub document_model: String,
    pub plan_model: String,
    pub image_model: String,
    pub video_model: String,
    pub system_instruction: String,
    pub plan_thinking_budget: i32,
    pub video_poll_interval_ms: u64,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            document_model: "gemini-2.5-flash".to_string(),
            plan_model: "gemini-3-pro-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            video_model: "veo-3.1-fast-generate-preview".to_string(),
            system_instruction: "You are Hanaxia, a helpful, professional, and intelligent AI \
                assistant used in a corporate environment. You can analyze images, audio, PDFs, \
                and other documents provided by the user."
                .to_string(),
            plan_thinking_budget: 2048,
            video_poll_interval_ms: 5000,
        }
    }
}
