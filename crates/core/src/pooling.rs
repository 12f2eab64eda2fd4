use crate::error::EmbedError;

const MASK_FLOOR: f32 = 1e-9;
const NORM_FLOOR: f32 = 1e-12;

/// Raw encoder output for a batch of sentences.
///
/// `values` is laid out as `[batch, sequence, hidden]`; `attention_mask` as
/// `[batch, sequence]` with 1 for real tokens and 0 for padding.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    pub batch_size: usize,
    pub sequence_length: usize,
    pub hidden_size: usize,
    pub values: Vec<f32>,
    pub attention_mask: Vec<i64>,
}

impl TokenBatch {
    pub fn validate(&self) -> Result<(), EmbedError> {
        let expected_values = self.batch_size * self.sequence_length * self.hidden_size;
        if self.values.len() != expected_values {
            return Err(EmbedError::Shape(format!(
                "expected {expected_values} token values for [{}, {}, {}], got {}",
                self.batch_size,
                self.sequence_length,
                self.hidden_size,
                self.values.len()
            )));
        }

        let expected_mask = self.batch_size * self.sequence_length;
        if self.attention_mask.len() != expected_mask {
            return Err(EmbedError::Shape(format!(
                "expected {expected_mask} mask entries, got {}",
                self.attention_mask.len()
            )));
        }

        Ok(())
    }
}

/// Averages token vectors over the positions the attention mask lets through.
pub fn mean_pool(batch: &TokenBatch) -> Result<Vec<Vec<f32>>, EmbedError> {
    batch.validate()?;

    let hidden = batch.hidden_size;
    let sequence = batch.sequence_length;
    let mut pooled = Vec::with_capacity(batch.batch_size);

    for sentence in 0..batch.batch_size {
        let mut sum = vec![0f32; hidden];
        let mut kept = 0f32;

        for token in 0..sequence {
            let weight = batch.attention_mask[sentence * sequence + token] as f32;
            if weight == 0.0 {
                continue;
            }
            kept += weight;

            let offset = (sentence * sequence + token) * hidden;
            for (slot, value) in sum.iter_mut().zip(&batch.values[offset..offset + hidden]) {
                *slot += value * weight;
            }
        }

        let denominator = kept.max(MASK_FLOOR);
        for slot in &mut sum {
            *slot /= denominator;
        }
        pooled.push(sum);
    }

    Ok(pooled)
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

/// Scales `vector` to unit length. All-zero input stays zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let denominator = l2_norm(vector).max(NORM_FLOOR);
    for value in vector.iter_mut() {
        *value /= denominator;
    }
}

pub fn pool_and_normalize(batch: &TokenBatch) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut pooled = mean_pool(batch)?;
    for vector in &mut pooled {
        l2_normalize(vector);
    }
    Ok(pooled)
}
