pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;

use crate::attachment::EncodedImage;
use crate::error::QueryError;

/// Sends one prompt, with an optional image, and returns the finished answer.
///
/// Calls are atomic from the caller's point of view: no partial text, no
/// retries, no timeout.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, prompt: &str, image: Option<&EncodedImage>) -> Result<String, QueryError>;
}
