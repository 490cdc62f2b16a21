use thiserror::Error;

/// Caller mistakes detected before any classification work starts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Image batch is empty")]
    EmptyBatch,

    #[error("Category selection is empty")]
    EmptySelection,

    #[error("Selection contains unknown category code: {code}")]
    UnknownCategory { code: String },

    #[error("Image name appears more than once in the batch: {name}")]
    DuplicateImage { name: String },

    #[error("Invalid image name: {name:?}")]
    InvalidImageName { name: String },
}

/// Errors that abort a whole sort run.
///
/// Per-image and per-category failures are never represented here; they are
/// collected into the run report instead.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SortError {
    /// Whether the caller, rather than the service, is at fault
    pub fn is_request_error(&self) -> bool {
        matches!(self, SortError::Request(_))
    }
}
