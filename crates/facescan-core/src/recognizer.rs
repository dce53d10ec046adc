//! Embedding-based face recognition.
//!
//! A recognizer is trained once from known (identity, embedding) pairs and
//! then answers "who is this?" for probe embeddings. Probes farther than the
//! distance threshold from every known face are reported as unknown.

use crate::kdtree::{IndexError, KdTree};
use crate::types::{Embedding, IdentityId};
use std::collections::HashMap;

/// Default number of neighbours consulted per probe.
pub const DEFAULT_NEIGHBORS: usize = 3;

/// Best identity for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub identity: IdentityId,
    /// Distance to the nearest neighbour voting for `identity`.
    pub distance: f32,
}

/// Strategy for classifying a probe embedding against trained faces.
pub trait EmbeddingRecognizer: Send + Sync {
    /// `Ok(None)` means the probe is unknown.
    fn recognize(&self, probe: &Embedding) -> Result<Option<Match>, IndexError>;

    /// Number of trained samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// k-nearest-neighbour recognizer over a KD-tree of trained embeddings.
///
/// Neighbours inside the threshold vote for their identity; the identity with
/// the most votes wins and ties go to the identity with the nearest vote.
#[derive(Debug, Clone)]
pub struct NearestNeighborRecognizer {
    tree: KdTree,
    threshold: f32,
    neighbors: usize,
}

impl NearestNeighborRecognizer {
    pub fn new(dimension: usize, threshold: f32, neighbors: usize) -> Result<Self, IndexError> {
        Ok(Self {
            tree: KdTree::new(dimension)?,
            threshold,
            neighbors: neighbors.max(1),
        })
    }

    /// Build a recognizer from trained samples.
    pub fn train<'a, I>(dimension: usize, samples: I, threshold: f32, neighbors: usize) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (IdentityId, &'a Embedding)>,
    {
        let mut recognizer = Self::new(dimension, threshold, neighbors)?;
        for (identity, embedding) in samples {
            recognizer.add(identity, embedding)?;
        }
        tracing::debug!(
            samples = recognizer.tree.len(),
            dimension,
            threshold,
            "nearest-neighbour recognizer trained"
        );
        Ok(recognizer)
    }

    pub fn add(&mut self, identity: IdentityId, embedding: &Embedding) -> Result<(), IndexError> {
        let sample_id = self.tree.len() as i64;
        self.tree.insert(sample_id, Some(identity), &embedding.values)?;
        Ok(())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn dimension(&self) -> usize {
        self.tree.dimension()
    }
}

impl EmbeddingRecognizer for NearestNeighborRecognizer {
    fn recognize(&self, probe: &Embedding) -> Result<Option<Match>, IndexError> {
        let hits = self.tree.nearest_neighbors(&probe.values, self.threshold, self.neighbors)?;

        // identity -> (votes, nearest distance)
        let mut tally: HashMap<IdentityId, (usize, f32)> = HashMap::new();
        for hit in &hits {
            let Some(identity) = hit.identity else { continue };
            let entry = tally.entry(identity).or_insert((0, hit.distance));
            entry.0 += 1;
            entry.1 = entry.1.min(hit.distance);
        }

        let best = tally.into_iter().max_by(|(a_id, a), (b_id, b)| {
            a.0.cmp(&b.0)
                .then(b.1.total_cmp(&a.1))
                .then(b_id.cmp(a_id))
        });

        Ok(best.map(|(identity, (_, distance))| Match { identity, distance }))
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_identical_embedding_is_recognized() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[0.0, 1.0, 0.0]);
        let r = NearestNeighborRecognizer::train(3, [(1, &a), (2, &b)], 0.5, 3).unwrap();

        let m = r.recognize(&a).unwrap().unwrap();
        assert_eq!(m.identity, 1);
        assert_eq!(m.distance, 0.0);
    }

    #[test]
    fn test_far_embedding_is_unknown() {
        let a = emb(&[1.0, 0.0]);
        let r = NearestNeighborRecognizer::train(2, [(1, &a)], 0.5, 3).unwrap();
        assert_eq!(r.recognize(&emb(&[-1.0, 0.0])).unwrap(), None);
    }

    #[test]
    fn test_empty_recognizer_reports_unknown() {
        let r = NearestNeighborRecognizer::new(2, 1.0, 3).unwrap();
        assert!(r.is_empty());
        assert_eq!(r.recognize(&emb(&[0.0, 0.0])).unwrap(), None);
    }

    #[test]
    fn test_majority_vote_wins() {
        let samples = [
            (1, emb(&[0.0, 0.10])),
            (1, emb(&[0.0, -0.10])),
            (2, emb(&[0.05, 0.0])),
        ];
        let r = NearestNeighborRecognizer::train(2, samples.iter().map(|(i, e)| (*i, e)), 1.0, 3).unwrap();
        // identity 2 is nearest, but identity 1 has two votes
        let m = r.recognize(&emb(&[0.0, 0.0])).unwrap().unwrap();
        assert_eq!(m.identity, 1);
        assert!((m.distance - 0.10).abs() < 1e-6);
    }

    #[test]
    fn test_tied_vote_goes_to_nearest() {
        let samples = [(1, emb(&[0.3])), (2, emb(&[-0.1]))];
        let r = NearestNeighborRecognizer::train(1, samples.iter().map(|(i, e)| (*i, e)), 1.0, 3).unwrap();
        assert_eq!(r.recognize(&emb(&[0.0])).unwrap().unwrap().identity, 2);
    }

    #[test]
    fn test_probe_dimension_mismatch_is_error() {
        let r = NearestNeighborRecognizer::new(3, 1.0, 1).unwrap();
        assert!(matches!(
            r.recognize(&emb(&[0.0, 0.0])),
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }
}
