use crate::embeddings::Embedder;
use crate::error::{IngestError, StoreError};
use crate::models::{FailurePolicy, Fragment, IndexState, RetrievalOptions};
use crate::persistence::SnapshotStore;
use crate::store::VectorStore;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How an indexing run ended, short of an error.
#[derive(Debug)]
pub enum IndexOutcome {
    /// Every fragment was embedded. `persist_error` is set when the snapshot
    /// could not be written; the store is still usable.
    Ready {
        store: VectorStore,
        skipped: usize,
        persist_error: Option<StoreError>,
    },
    /// No fragments were supplied and a previous snapshot was found.
    Loaded(VectorStore),
    /// Nothing to index and nothing persisted.
    Empty,
    /// The token fired between batches; nothing was persisted.
    Cancelled,
}

impl IndexOutcome {
    pub fn into_store(self) -> Option<VectorStore> {
        match self {
            Self::Ready { store, .. } | Self::Loaded(store) => Some(store),
            Self::Empty | Self::Cancelled => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Loaded(_))
    }
}

/// Drives fragments through the embedder into a [`VectorStore`] batch by batch.
pub struct IndexingPipeline {
    embedder: Arc<dyn Embedder>,
    snapshots: Arc<dyn SnapshotStore>,
    batch_size: usize,
    failure_policy: FailurePolicy,
    state: IndexState,
}

impl IndexingPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        snapshots: Arc<dyn SnapshotStore>,
        options: &RetrievalOptions,
    ) -> Result<Self, IngestError> {
        if options.batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            embedder,
            snapshots,
            batch_size: options.batch_size,
            failure_policy: options.failure_policy,
            state: IndexState::Empty,
        })
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Builds a store from `fragments`, or loads the persisted one when `None`.
    ///
    /// `progress` receives the fraction of fragments embedded so far, always
    /// below 1.0; the call returning is the completion signal. It runs on the
    /// caller's task and must not block. `cancel` is polled before every batch.
    pub async fn initialize<P>(
        &mut self,
        fragments: Option<Vec<Fragment>>,
        mut progress: P,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome, IngestError>
    where
        P: FnMut(f32) + Send,
    {
        self.state = IndexState::Empty;

        let fragments = match fragments {
            Some(fragments) => fragments,
            None => return Ok(self.load_persisted().await),
        };

        self.state = IndexState::ChunkingDone;
        if fragments.is_empty() {
            debug!("no fragments supplied, nothing to index");
            return Ok(IndexOutcome::Empty);
        }

        self.state = IndexState::EmbeddingInProgress;
        let started = Instant::now();
        let total = fragments.len();
        let mut store = VectorStore::new(self.embedder.dimensions());
        let mut processed = 0usize;
        let mut skipped = 0usize;

        for batch in fragments.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                warn!(processed, total, "indexing cancelled");
                self.state = IndexState::Cancelled;
                return Ok(IndexOutcome::Cancelled);
            }

            let first_position = batch[0].position;
            let texts: Vec<String> = batch.iter().map(|fragment| fragment.text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);
            let embedded = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts)).await;
            let vectors = match embedded {
                Ok(vectors) => vectors,
                Err(error) => {
                    self.state = IndexState::Failed;
                    return Err(IngestError::Join(error));
                }
            };

            if vectors.len() != batch.len() {
                let reason = format!(
                    "adapter returned {} vectors for {} fragments",
                    vectors.len(),
                    batch.len()
                );
                match self.failure_policy {
                    FailurePolicy::Abort => {
                        self.state = IndexState::Failed;
                        return Err(IngestError::Embedding {
                            first_position,
                            reason,
                        });
                    }
                    FailurePolicy::SkipFragment => {
                        warn!(first_position, fragments = batch.len(), %reason, "skipping batch");
                        skipped += batch.len();
                    }
                }
            } else {
                for (fragment, vector) in batch.iter().zip(vectors) {
                    let mut embedded = fragment.clone();
                    embedded.vector = Some(vector);
                    if let Err(error) = store.push(embedded) {
                        self.state = IndexState::Failed;
                        return Err(IngestError::Embedding {
                            first_position: fragment.position,
                            reason: error.to_string(),
                        });
                    }
                }
            }

            processed += batch.len();
            debug!(processed, total, "batch embedded");
            if processed < total {
                progress(processed as f32 / total as f32);
            }
        }

        if store.is_empty() {
            self.state = IndexState::Failed;
            return Err(IngestError::Embedding {
                first_position: fragments[0].position,
                reason: "no fragment could be embedded".to_string(),
            });
        }

        self.state = IndexState::Ready;
        let persist_error = self.snapshots.save(&store).await.err();
        if let Some(error) = &persist_error {
            warn!(%error, "failed to persist vector store, keeping it in memory");
        }

        info!(
            fragments = store.len(),
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexing finished"
        );

        Ok(IndexOutcome::Ready {
            store,
            skipped,
            persist_error,
        })
    }

    async fn load_persisted(&mut self) -> IndexOutcome {
        let Some(store) = self.snapshots.load_or_absent().await else {
            return IndexOutcome::Empty;
        };

        if store.dimensions() != self.embedder.dimensions() {
            warn!(
                persisted = store.dimensions(),
                expected = self.embedder.dimensions(),
                "persisted store has a different dimensionality, ignoring it"
            );
            return IndexOutcome::Empty;
        }

        self.state = IndexState::Ready;
        IndexOutcome::Loaded(store)
    }
}
