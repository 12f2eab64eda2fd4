use serde::{Deserialize, Serialize};

/// A chunked unit of page text, the atomic retrievable item.
///
/// `position` is the fragment's index within the source document and is the
/// unit of adjacency used when windowing search hits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub position: u64,
    pub page: u32,
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

impl Fragment {
    pub fn new(position: u64, page: u32, text: impl Into<String>) -> Self {
        Self {
            position,
            page,
            text: text.into(),
            vector: None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.vector.is_some()
    }
}

/// What to do with fragments whose embedding call produced nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fail the whole indexing run; nothing is persisted.
    #[default]
    Abort,
    /// Drop the fragments of the failed batch and keep indexing.
    SkipFragment,
}

/// Pipeline state machine for one indexing run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    ChunkingDone,
    EmbeddingInProgress,
    Ready,
    Cancelled,
    Failed,
}

/// Lifecycle of a retrieval service, published to anyone awaiting readiness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Readiness {
    Uninitialized,
    ModelLoaded,
    StoreLoaded,
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub window_radius: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, options: &RetrievalOptions) -> Self {
        Self {
            text: text.into(),
            top_k: options.top_k,
            window_radius: options.window_radius,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub chunk_max_chars: usize,
    pub preserve_unicode: bool,
    pub batch_size: usize,
    pub top_k: usize,
    pub window_radius: usize,
    pub store_file: String,
    pub failure_policy: FailurePolicy,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_024,
            preserve_unicode: false,
            batch_size: 32,
            top_k: 5,
            window_radius: 3,
            store_file: "vectors.vec".to_string(),
            failure_policy: FailurePolicy::Abort,
        }
    }
}
