use thiserror::Error;

/// Everything the story persistence layer can fail with.
///
/// `Format` and `Decryption` are both load-boundary failures; callers
/// report them and keep the current graph rather than falling back to an
/// empty one.
#[derive(Error, Debug)]
pub enum StoryError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoryError {
    pub(crate) fn format(e: impl std::fmt::Display) -> Self {
        StoryError::Format(e.to_string())
    }
}

/// Convenience type alias for Results with StoryError
pub type Result<T> = std::result::Result<T, StoryError>;
