//! Dense vector index.
//!
//! A flat inner-product index over L2-normalized embeddings, so inner
//! product equals cosine similarity. Holds only the chunks that actually
//! carry an embedding; the parallel id list lives in the index artifact
//! next to it.

use serde::{Deserialize, Serialize};

/// Flat dense index. Row `i` corresponds to entry `i` of the dense id list
/// stored alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseIndex {
    pub dim: usize,
    vectors: Vec<Vec<f32>>,
}

/// L2-normalize in place. Zero vectors pass through unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl DenseIndex {
    pub fn new(dim: usize) -> Self {
        DenseIndex {
            dim,
            vectors: Vec::new(),
        }
    }

    /// Normalize and append a vector. Rejects dimension mismatches.
    pub fn push(&mut self, mut vector: Vec<f32>) -> Result<(), String> {
        if vector.len() != self.dim {
            return Err(format!(
                "dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            ));
        }
        l2_normalize(&mut vector);
        self.vectors.push(vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top `k` rows by inner product with `query`, descending, ties broken
    /// by row index. The query is normalized before scoring.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim || self.vectors.is_empty() {
            return Vec::new();
        }
        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut ranked: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let dot = row.iter().zip(q.iter()).map(|(a, b)| a * b).sum::<f32>();
                (i, dot)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_passthrough() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_search_ordering() {
        let mut index = DenseIndex::new(2);
        index.push(vec![1.0, 0.0]).unwrap(); // aligned
        index.push(vec![1.0, 1.0]).unwrap(); // 45 degrees
        index.push(vec![0.0, 1.0]).unwrap(); // orthogonal
        let hits = index.search(&[1.0, 0.0], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
        assert_eq!(hits[2].0, 2);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!(hits[2].1.abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let mut index = DenseIndex::new(2);
        for _ in 0..5 {
            index.push(vec![1.0, 0.0]).unwrap();
        }
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = DenseIndex::new(3);
        assert!(index.push(vec![1.0, 2.0]).is_err());
        assert!(index.search(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut index = DenseIndex::new(2);
        index.push(vec![1.0, 2.0]).unwrap();
        let raw = serde_json::to_string(&index).unwrap();
        let restored: DenseIndex = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.dim, 2);
    }
}
