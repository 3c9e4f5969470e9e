use thiserror::Error;

/// Unified application error type to simplify bubbling errors through async flows.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Error serializing json. {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Error communicating with the AI. {0}")]
    AIClient(#[from] async_openai::error::OpenAIError),
    #[error("The model server does not support the requested response format. {0}")]
    UnsupportedResponseFormat(String),
    #[error("Error while writing information to a string. {0}")]
    BufferWrite(#[from] std::fmt::Error),
    #[error("Unable to parse string. {0}")]
    Utf8Parse(#[from] std::string::FromUtf8Error),
    #[error("Directory not found error. {0}")]
    Dir(#[from] post_clusters_dirs::DirError),
    #[error("Error while clustering embeddings. {0}")]
    Clustering(String),
    #[error("Embedding dimensions disagree: expected {expected}, row {row_id} has {found}")]
    DimensionMismatch {
        row_id: usize,
        expected: usize,
        found: usize,
    },
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Linear algebra error. {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("Unable to project embeddings to 2D. {0}")]
    Projection(String),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("Error formatting a timestamp. {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("{0}")]
    Other(String),
}

impl From<hdbscan::HdbscanError> for AppError {
    fn from(e: hdbscan::HdbscanError) -> Self {
        AppError::Clustering(format!("{e:?}"))
    }
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
