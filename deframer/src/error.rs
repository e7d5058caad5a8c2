use thiserror::Error;

/// Failure kinds of the deframing pipeline.
///
/// `Extraction` and `Completion` are recovered inside the reframer; every other kind
/// aborts the refresh cycle that hit it.
#[derive(Debug, Error)]
pub enum DeframeError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("feed parse failed: {0}")]
    Parse(String),

    #[error("no JSON in completion: {0}")]
    Extraction(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("rendering feed failed: {0}")]
    Render(String),
}

impl DeframeError {
    /// AI-side failures are worth another attempt; the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeframeError::Extraction(_) | DeframeError::Completion(_))
    }
}

pub type Result<T, E = DeframeError> = std::result::Result<T, E>;
