pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod pooling;
pub mod retrieval;
pub mod store;

pub use chunking::{chunk, Chunker, ChunkingConfig};
pub use context::{distinct_fragments, format_context};
pub use embeddings::{
    CharacterNgramEncoder, Embedder, HttpEncoderConfig, HttpTokenEncoder, SentenceEmbedder,
    TokenEncoder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbedError, IngestError, SearchError, StoreError};
pub use extractor::{
    extract_page_texts, LopdfExtractor, PageExtractor, PageText, PlainTextExtractor,
};
pub use models::{FailurePolicy, Fragment, IndexState, Readiness, RetrievalOptions, SearchQuery};
pub use persistence::{FileSnapshotStore, SnapshotStore};
pub use pipeline::{IndexOutcome, IndexingPipeline};
pub use pooling::{l2_normalize, mean_pool, TokenBatch};
pub use retrieval::{wait_until_ready, RetrievalService};
pub use store::{checked_dot, window_bounds, VectorStore};
