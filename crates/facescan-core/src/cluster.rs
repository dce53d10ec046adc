//! Density-based grouping of untrained faces.
//!
//! DBSCAN over Euclidean distance, with region queries answered by a
//! [`KdTree`] built over the input. A face with at least `min_points`
//! embeddings within `eps` (itself included) is a core point; clusters grow
//! from core points through their neighbourhoods, and faces reachable from
//! no core point are noise.

use crate::kdtree::{IndexError, KdTree};
use crate::types::Embedding;

/// Cluster label per input embedding, in input order.
///
/// Labels start at 0 and are numbered in discovery order. `None` marks
/// noise. A border point within reach of several clusters joins the first
/// one that reaches it.
pub fn cluster(embeddings: &[Embedding], eps: f32, min_points: usize) -> Result<Vec<Option<usize>>, IndexError> {
    let Some(first) = embeddings.first() else {
        return Ok(Vec::new());
    };
    let tree = KdTree::build(
        first.dimension(),
        embeddings.iter().enumerate().map(|(i, e)| (i as i64, None, e.values.as_slice())),
    )?;

    let count = embeddings.len();
    let region = |i: usize| -> Result<Vec<usize>, IndexError> {
        let hits = tree.nearest_neighbors(&embeddings[i].values, eps, count)?;
        Ok(hits.into_iter().map(|n| n.record_id as usize).collect())
    };

    let mut labels: Vec<Option<usize>> = vec![None; count];
    let mut visited = vec![false; count];
    let mut clusters = 0;

    for start in 0..count {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let seeds = region(start)?;
        if seeds.len() < min_points {
            continue;
        }

        let label = clusters;
        clusters += 1;
        labels[start] = Some(label);

        let mut frontier = seeds;
        while let Some(i) = frontier.pop() {
            if labels[i].is_none() {
                labels[i] = Some(label);
            }
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let reach = region(i)?;
            if reach.len() >= min_points {
                frontier.extend(reach);
            }
        }
    }

    tracing::debug!(faces = count, clusters, "clustered embeddings");
    Ok(labels)
}
