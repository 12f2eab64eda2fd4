use crate::error::EmbedError;
use crate::pooling::{pool_and_normalize, TokenBatch};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Produces per-token vectors and an attention mask for a batch of sentences.
pub trait TokenEncoder: Send + Sync {
    fn hidden_size(&self) -> usize;
    fn encode(&self, sentences: &[String]) -> Result<TokenBatch, EmbedError>;
}

/// Turns sentences into unit-length vectors.
///
/// Failures never cross this boundary: a failed call yields an empty result.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed_batch(&self, sentences: &[String]) -> Vec<Vec<f32>>;

    fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_batch(&[text.to_string()])
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Loads the underlying model if that has not happened yet.
    fn warm_up(&self) -> Result<(), EmbedError> {
        Ok(())
    }
}

type EncoderLoader<E> = Box<dyn Fn() -> Result<E, EmbedError> + Send + Sync>;

/// Mean-pooling, L2-normalizing wrapper around a lazily loaded [`TokenEncoder`].
pub struct SentenceEmbedder<E> {
    dimensions: usize,
    loader: EncoderLoader<E>,
    encoder: Mutex<Option<Arc<E>>>,
}

impl<E: TokenEncoder> SentenceEmbedder<E> {
    pub fn lazy<F>(dimensions: usize, loader: F) -> Self
    where
        F: Fn() -> Result<E, EmbedError> + Send + Sync + 'static,
    {
        Self {
            dimensions,
            loader: Box::new(loader),
            encoder: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.encoder
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn encoder(&self) -> Result<Arc<E>, EmbedError> {
        let mut slot = self
            .encoder
            .lock()
            .map_err(|_| EmbedError::Model("encoder lock poisoned".to_string()))?;

        if let Some(encoder) = slot.as_ref() {
            return Ok(Arc::clone(encoder));
        }

        let encoder = (self.loader)()?;
        if encoder.hidden_size() != self.dimensions {
            return Err(EmbedError::Shape(format!(
                "encoder hidden size {} does not match configured {}",
                encoder.hidden_size(),
                self.dimensions
            )));
        }

        info!(dimensions = self.dimensions, "embedding model loaded");
        let encoder = Arc::new(encoder);
        *slot = Some(Arc::clone(&encoder));
        Ok(encoder)
    }

    fn try_embed(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let encoder = self.encoder()?;
        let batch = encoder.encode(sentences)?;

        if batch.batch_size != sentences.len() {
            return Err(EmbedError::Shape(format!(
                "encoder returned {} rows for {} sentences",
                batch.batch_size,
                sentences.len()
            )));
        }
        if batch.hidden_size != self.dimensions {
            return Err(EmbedError::Shape(format!(
                "encoder returned hidden size {}, expected {}",
                batch.hidden_size, self.dimensions
            )));
        }

        pool_and_normalize(&batch)
    }
}

impl<E: TokenEncoder + 'static> SentenceEmbedder<E> {
    pub fn from_encoder(encoder: E) -> Self {
        let dimensions = encoder.hidden_size();
        Self {
            dimensions,
            loader: Box::new(|| Err(EmbedError::Model("encoder already provided".to_string()))),
            encoder: Mutex::new(Some(Arc::new(encoder))),
        }
    }
}

impl<E: TokenEncoder> Embedder for SentenceEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, sentences: &[String]) -> Vec<Vec<f32>> {
        if sentences.is_empty() {
            return Vec::new();
        }

        match self.try_embed(sentences) {
            Ok(vectors) => vectors,
            Err(error) => {
                warn!(%error, sentences = sentences.len(), "embedding call failed");
                Vec::new()
            }
        }
    }

    fn warm_up(&self) -> Result<(), EmbedError> {
        self.encoder().map(|_| ())
    }
}

/// Deterministic offline encoder: every whitespace token becomes a hashed
/// character-trigram histogram.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEncoder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEncoder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEncoder {
    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let padded: Vec<char> = format!(" {} ", token.to_lowercase()).chars().collect();

        for window in padded.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        vector
    }
}

impl TokenEncoder for CharacterNgramEncoder {
    fn hidden_size(&self) -> usize {
        self.dimensions.max(1)
    }

    fn encode(&self, sentences: &[String]) -> Result<TokenBatch, EmbedError> {
        let hidden = self.hidden_size();
        let tokenized: Vec<Vec<&str>> = sentences
            .iter()
            .map(|sentence| sentence.split_whitespace().collect())
            .collect();
        let sequence = tokenized.iter().map(Vec::len).max().unwrap_or(0).max(1);

        let mut values = Vec::with_capacity(sentences.len() * sequence * hidden);
        let mut attention_mask = Vec::with_capacity(sentences.len() * sequence);

        for tokens in &tokenized {
            for position in 0..sequence {
                match tokens.get(position) {
                    Some(token) => {
                        values.extend(self.token_vector(token));
                        attention_mask.push(1);
                    }
                    None => {
                        values.extend(std::iter::repeat(0f32).take(hidden));
                        attention_mask.push(0);
                    }
                }
            }
        }

        Ok(TokenBatch {
            batch_size: sentences.len(),
            sequence_length: sequence,
            hidden_size: hidden,
            values,
            attention_mask,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpEncoderConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub hidden_size: usize,
}

impl HttpEncoderConfig {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        hidden_size: usize,
    ) -> Result<Self, EmbedError> {
        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Ok(Self {
            endpoint: Url::parse(endpoint.trim())?,
            api_key,
            hidden_size,
        })
    }
}

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    token_embeddings: Vec<Vec<Vec<f32>>>,
    attention_mask: Vec<Vec<i64>>,
}

/// Token encoder backed by an external inference server.
///
/// The server receives `{"inputs": [...]}` and answers with per-sentence
/// `token_embeddings` (`[tokens][hidden]`) and a matching `attention_mask`.
#[derive(Debug, Clone)]
pub struct HttpTokenEncoder {
    config: HttpEncoderConfig,
}

impl HttpTokenEncoder {
    pub fn new(config: HttpEncoderConfig) -> Self {
        Self { config }
    }
}

impl TokenEncoder for HttpTokenEncoder {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn encode(&self, sentences: &[String]) -> Result<TokenBatch, EmbedError> {
        let mut request = Client::new()
            .post(self.config.endpoint.clone())
            .header("content-type", "application/json")
            .json(&EncodeRequest { inputs: sentences });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(EmbedError::BackendResponse {
                backend: self.config.endpoint.to_string(),
                details: format!("status {}", response.status()),
            });
        }

        let body = response.text()?;
        let payload: EncodeResponse = serde_json::from_str(&body)?;
        debug!(rows = payload.token_embeddings.len(), "encoder response received");
        response_to_batch(payload, self.config.hidden_size)
    }
}

fn response_to_batch(payload: EncodeResponse, hidden: usize) -> Result<TokenBatch, EmbedError> {
    if payload.token_embeddings.len() != payload.attention_mask.len() {
        return Err(EmbedError::Shape(format!(
            "{} embedding rows but {} mask rows",
            payload.token_embeddings.len(),
            payload.attention_mask.len()
        )));
    }

    let sequence = payload
        .token_embeddings
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(1);

    let mut values = Vec::with_capacity(payload.token_embeddings.len() * sequence * hidden);
    let mut attention_mask = Vec::with_capacity(payload.token_embeddings.len() * sequence);

    for (tokens, mask) in payload.token_embeddings.iter().zip(&payload.attention_mask) {
        if tokens.len() != mask.len() {
            return Err(EmbedError::Shape(format!(
                "{} tokens but {} mask entries",
                tokens.len(),
                mask.len()
            )));
        }

        for position in 0..sequence {
            match tokens.get(position) {
                Some(token) if token.len() == hidden => {
                    values.extend_from_slice(token);
                    attention_mask.push(mask[position]);
                }
                Some(token) => {
                    return Err(EmbedError::Shape(format!(
                        "token vector has {} values, expected {hidden}",
                        token.len()
                    )));
                }
                None => {
                    values.extend(std::iter::repeat(0f32).take(hidden));
                    attention_mask.push(0);
                }
            }
        }
    }

    Ok(TokenBatch {
        batch_size: payload.token_embeddings.len(),
        sequence_length: sequence,
        hidden_size: hidden,
        values,
        attention_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::l2_norm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingEncoder;

    impl TokenEncoder for FailingEncoder {
        fn hidden_size(&self) -> usize {
            4
        }

        fn encode(&self, _sentences: &[String]) -> Result<TokenBatch, EmbedError> {
            Err(EmbedError::Model("inference session crashed".to_string()))
        }
    }

    #[test]
    fn embedder_is_deterministic_and_normalized() {
        let embedder = SentenceEmbedder::from_encoder(CharacterNgramEncoder::default());
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert!((l2_norm(&first) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batch_rows_match_single_calls() {
        let embedder = SentenceEmbedder::from_encoder(CharacterNgramEncoder { dimensions: 32 });
        let sentences = vec!["short".to_string(), "a much longer sentence here".to_string()];
        let batch = embedder.embed_batch(&sentences);

        assert_eq!(batch.len(), 2);
        for (sentence, vector) in sentences.iter().zip(&batch) {
            let single = embedder.embed(sentence);
            for (left, right) in single.iter().zip(vector) {
                assert!((left - right).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn failing_encoder_yields_empty_result() {
        let embedder = SentenceEmbedder::from_encoder(FailingEncoder);
        assert!(embedder.embed_batch(&["text".to_string()]).is_empty());
        assert!(embedder.embed("text").is_empty());
    }

    #[test]
    fn encoder_is_loaded_once_and_reused() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let embedder = SentenceEmbedder::lazy(16, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CharacterNgramEncoder { dimensions: 16 })
        });

        assert!(!embedder.is_loaded());
        embedder.embed("first");
        embedder.embed("second");
        assert!(embedder.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_hidden_size_fails_warm_up() {
        let embedder = SentenceEmbedder::lazy(8, || Ok(CharacterNgramEncoder { dimensions: 16 }));
        assert!(matches!(embedder.warm_up(), Err(EmbedError::Shape(_))));
        assert!(embedder.embed("anything").is_empty());
    }

    #[test]
    fn http_response_is_padded_into_a_batch() {
        let body = r#"{
            "token_embeddings": [[[1.0, 0.0], [0.0, 1.0]], [[2.0, 2.0]]],
            "attention_mask": [[1, 1], [1]]
        }"#;
        let payload: EncodeResponse = serde_json::from_str(body).unwrap();

        let batch = response_to_batch(payload, 2).unwrap();
        assert_eq!(batch.sequence_length, 2);
        assert_eq!(batch.attention_mask, vec![1, 1, 1, 0]);
        assert_eq!(batch.values, vec![1.0, 0.0, 0.0, 1.0, 2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn http_response_with_wrong_hidden_size_is_rejected() {
        let payload = EncodeResponse {
            token_embeddings: vec![vec![vec![1.0, 0.0, 3.0]]],
            attention_mask: vec![vec![1]],
        };
        assert!(matches!(response_to_batch(payload, 2), Err(EmbedError::Shape(_))));
    }

    #[test]
    fn http_response_missing_mask_fails_to_decode() {
        let body = r#"{"token_embeddings": [[[1.0, 0.0]]]}"#;
        let error = serde_json::from_str::<EncodeResponse>(body).map_err(EmbedError::from);
        assert!(matches!(error, Err(EmbedError::Decode(_))));
    }

    #[test]
    fn http_config_rejects_bad_urls_and_blank_keys() {
        assert!(HttpEncoderConfig::new("not a url", None, 4).is_err());
        let config = HttpEncoderConfig::new(" http://localhost:8080/embed ", Some("  ".into()), 4)
            .unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.endpoint.as_str(), "http://localhost:8080/embed");
    }
}
