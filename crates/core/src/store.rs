use crate::error::{SearchError, StoreError};
use crate::models::Fragment;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Ordered fragments plus the length every embedding in them must have.
///
/// Order is adjacency: windowing expands a hit by index in `fragments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStore {
    dimensions: usize,
    fragments: Vec<Fragment>,
}

impl VectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fragments: Vec::new(),
        }
    }

    pub fn from_fragments(dimensions: usize, fragments: Vec<Fragment>) -> Result<Self, StoreError> {
        let mut store = Self::new(dimensions);
        store.fragments.reserve(fragments.len());
        for fragment in fragments {
            store.push(fragment)?;
        }
        Ok(store)
    }

    pub fn push(&mut self, fragment: Fragment) -> Result<(), StoreError> {
        if let Some(vector) = &fragment.vector {
            if vector.len() != self.dimensions {
                return Err(StoreError::Inconsistent(format!(
                    "fragment {} has {} dimensions, store has {}",
                    fragment.position,
                    vector.len(),
                    self.dimensions
                )));
            }
        }
        self.fragments.push(fragment);
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn into_parts(self) -> (usize, Vec<Fragment>) {
        (self.dimensions, self.fragments)
    }

    pub fn get(&self, index: usize) -> Option<&Fragment> {
        self.fragments.get(index)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// True when every fragment carries an embedding.
    pub fn is_complete(&self) -> bool {
        self.fragments.iter().all(Fragment::is_embedded)
    }

    /// Similarity of every fragment to `query`, in store order.
    pub fn scores(&self, query: &[f32]) -> Result<Vec<f32>, SearchError> {
        if query.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        self.fragments
            .iter()
            .enumerate()
            .map(|(index, fragment)| {
                let vector = fragment
                    .vector
                    .as_deref()
                    .ok_or(SearchError::MissingVector { index })?;
                checked_dot(vector, query).ok_or(SearchError::Overflow { index })
            })
            .collect()
    }

    /// Fragment indices ordered by descending similarity to `query`.
    ///
    /// Equal scores keep store order.
    pub fn rank(&self, query: &[f32]) -> Result<Vec<usize>, SearchError> {
        let scores = self.scores(query)?;
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&left, &right| scores[right].total_cmp(&scores[left]));
        Ok(order)
    }

    pub fn nearest(&self, query: &[f32]) -> Result<Option<usize>, SearchError> {
        Ok(self.rank(query)?.into_iter().next())
    }

    /// The hit at `index` together with up to `radius` neighbors on each side.
    pub fn window(&self, index: usize, radius: usize) -> &[Fragment] {
        &self.fragments[window_bounds(self.fragments.len(), index, radius)]
    }
}

/// `[index - radius, index + radius]` clamped to `[0, len)`.
pub fn window_bounds(len: usize, index: usize, radius: usize) -> Range<usize> {
    if index >= len {
        return len..len;
    }
    let start = index.saturating_sub(radius);
    let end = index.saturating_add(radius).saturating_add(1).min(len);
    start..end
}

/// Dot product that refuses to return a non-finite result.
pub fn checked_dot(left: &[f32], right: &[f32]) -> Option<f32> {
    let mut sum = 0f32;
    for (a, b) in left.iter().zip(right) {
        let product = a * b;
        if !product.is_finite() {
            return None;
        }
        sum += product;
        if !sum.is_finite() {
            return None;
        }
    }
    Some(sum)
}
