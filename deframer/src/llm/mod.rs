use async_trait::async_trait;

use crate::error::Result;

pub mod extract;
pub mod remote;

pub use extract::extract_json;

/// Core trait for completion providers: a (system, user) prompt pair in, raw model text out.
///
/// Implementations own their transport timeout; the pipeline never waits on a call forever.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
