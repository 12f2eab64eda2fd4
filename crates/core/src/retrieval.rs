use crate::embeddings::Embedder;
use crate::error::{EmbedError, SearchError};
use crate::models::{Fragment, Readiness, SearchQuery};
use crate::store::VectorStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Read-only query side over a finished [`VectorStore`].
///
/// Readiness is published on a watch channel so callers can await it instead
/// of polling; [`RetrievalService::is_ready`] answers the same question
/// synchronously.
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    store: Option<VectorStore>,
    model_loaded: bool,
    readiness: watch::Sender<Readiness>,
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Uninitialized);
        Self {
            embedder,
            store: None,
            model_loaded: false,
            readiness,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    pub fn store(&self) -> Option<&VectorStore> {
        self.store.as_ref()
    }

    /// Loads the embedding model off the async executor.
    pub async fn load_model(&mut self) -> Result<(), EmbedError> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || embedder.warm_up())
            .await
            .map_err(|error| EmbedError::Model(error.to_string()))??;

        self.model_loaded = true;
        self.publish();
        Ok(())
    }

    /// Takes ownership of a finished store for querying.
    pub fn attach_store(&mut self, store: VectorStore) -> Result<(), SearchError> {
        if !store.is_complete() {
            return Err(SearchError::NotReady(
                "store still has unembedded fragments".to_string(),
            ));
        }
        if store.dimensions() != self.embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: store.dimensions(),
            });
        }

        info!(fragments = store.len(), "vector store attached");
        self.store = Some(store);
        self.publish();
        Ok(())
    }

    pub fn detach_store(&mut self) -> Option<VectorStore> {
        let store = self.store.take();
        self.publish();
        store
    }

    fn publish(&self) {
        let readiness = match (self.model_loaded, self.store.is_some()) {
            (true, true) => Readiness::Ready,
            (true, false) => Readiness::ModelLoaded,
            (false, true) => Readiness::StoreLoaded,
            (false, false) => Readiness::Uninitialized,
        };
        self.readiness.send_replace(readiness);
    }

    /// Ranks the store against `query` and returns the windowed neighborhoods
    /// of the top hits, concatenated in rank order.
    ///
    /// Windows may overlap and repeat fragments. Not being ready, a blank query
    /// or a failed query embedding all yield an empty list.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Fragment>, SearchError> {
        let store = match (&self.store, self.is_ready()) {
            (Some(store), true) => store,
            _ => {
                debug!(readiness = ?self.readiness(), "search while not ready");
                return Ok(Vec::new());
            }
        };

        if query.text.trim().is_empty() || query.top_k == 0 || store.is_empty() {
            return Ok(Vec::new());
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query.text.clone();
        let query_vector = match tokio::task::spawn_blocking(move || embedder.embed(&text)).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!(%error, "query embedding task failed");
                return Ok(Vec::new());
            }
        };

        if query_vector.is_empty() {
            return Ok(Vec::new());
        }

        let ranking = store.rank(&query_vector)?;
        Ok(expand_hits(store, &ranking, query.top_k, query.window_radius))
    }
}

/// Concatenates the windows around the first `top_k` ranked indices.
pub fn expand_hits(
    store: &VectorStore,
    ranking: &[usize],
    top_k: usize,
    radius: usize,
) -> Vec<Fragment> {
    ranking
        .iter()
        .take(top_k)
        .flat_map(|&index| store.window(index, radius).iter().cloned())
        .collect()
}

/// Resolves once `receiver` reports [`Readiness::Ready`].
///
/// Returns `false` if the service was dropped first.
pub async fn wait_until_ready(receiver: &mut watch::Receiver<Readiness>) -> bool {
    receiver
        .wait_for(|readiness| *readiness == Readiness::Ready)
        .await
        .is_ok()
}
