//! Exact nearest-neighbor index over L2-normalized embeddings.
//!
//! A flat linear scan: every query touches every vector, and the index is
//! rebuilt wholesale from the record embeddings after each mutation, so both
//! queries and rebuilds are O(N).

use crate::types::{squared_l2, Embedding};
use serde::{Deserialize, Serialize};

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position in the record sequence the index was built from.
    pub index: usize,
    /// Squared Euclidean distance between unit vectors, in [0, 4].
    pub distance: f32,
}

impl Neighbor {
    /// Cosine similarity recovered from the unit-vector distance:
    /// |a - b|^2 = 2 - 2 cos(a, b).
    pub fn similarity(&self) -> f32 {
        distance_to_similarity(self.distance)
    }
}

pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Build from the full embedding sequence. Returns `None` for an empty
    /// sequence. Callers guarantee a uniform dimension.
    pub fn build(embeddings: &[Embedding]) -> Option<Self> {
        let first = embeddings.first()?;
        let vectors = embeddings
            .iter()
            .map(|e| e.normalized().values)
            .collect::<Vec<_>>();

        Some(Self {
            dimension: first.dim(),
            vectors,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The `k` nearest vectors to `query` (already unit length), closest
    /// first. Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, v)| Neighbor {
                index,
                distance: squared_l2(query, v),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }

    /// An index whose shape disagrees with its records must be rebuilt.
    pub(crate) fn is_consistent_with(&self, embeddings: &[Embedding]) -> bool {
        self.vectors.len() == embeddings.len()
            && self.vectors.iter().all(|v| v.len() == self.dimension)
            && embeddings.iter().all(|e| e.dim() == self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_build_empty_is_none() {
        assert!(FlatIndex::build(&[]).is_none());
    }

    #[test]
    fn test_build_normalizes() {
        let index = FlatIndex::build(&[emb(&[3.0, 4.0])]).unwrap();
        assert_eq!(index.dimension(), 2);
        assert_eq!(index.len(), 1);
        let hits = index.search(&[0.6, 0.8], 1);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = FlatIndex::build(&[
            emb(&[0.0, 1.0, 0.0]),
            emb(&[1.0, 0.0, 0.0]),
            emb(&[1.0, 1.0, 0.0]),
        ])
        .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits[0].similarity() > hits[1].similarity());
        assert!(hits[1].similarity() > hits[2].similarity());
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = FlatIndex::build(&[emb(&[1.0, 0.0]), emb(&[0.0, 1.0]), emb(&[-1.0, 0.0])]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = FlatIndex::build(&[emb(&[0.0, 1.0]), emb(&[0.0, -1.0])]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[1].index, 1);
    }

    #[test]
    fn test_distance_to_similarity_endpoints() {
        assert!((distance_to_similarity(0.0) - 1.0).abs() < 1e-6);
        assert!(distance_to_similarity(2.0).abs() < 1e-6);
        assert!((distance_to_similarity(4.0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_consistency_check() {
        let embeddings = vec![emb(&[1.0, 0.0]), emb(&[0.0, 1.0])];
        let index = FlatIndex::build(&embeddings).unwrap();
        assert!(index.is_consistent_with(&embeddings));
        assert!(!index.is_consistent_with(&embeddings[..1]));
        assert!(!index.is_consistent_with(&[emb(&[1.0, 0.0]), emb(&[0.0, 1.0, 0.0])]));
    }
}
