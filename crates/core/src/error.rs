use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed for batch starting at fragment {first_position}: {reason}")]
    Embedding { first_position: u64, reason: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("model error: {0}")]
    Model(String),

    #[error("unexpected tensor shape: {0}")]
    Shape(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed encoder response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum SearchError {
    #[error("query has {actual} dimensions but the store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("similarity overflowed while scoring fragment {index}")]
    Overflow { index: usize },

    #[error("fragment {index} has no embedding")]
    MissingVector { index: usize },

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("snapshot checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot name must be a plain file name: {0:?}")]
    InvalidName(String),

    #[error("inconsistent store: {0}")]
    Inconsistent(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
