//! Lazily built, invalidatable in-memory view of the embedding store.
//!
//! Readers get an immutable [`CacheSnapshot`] behind an `Arc`. Invalidation
//! only bumps a generation counter; the next [`EmbeddingCache::get`] rebuilds
//! under a single mutex, so callers arriving during a rebuild wait for it
//! and then share its result.

use crate::error::StoreError;
use crate::traits::EmbeddingStore;
use facescan_core::{Embedding, IdentityId, TagKey};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of principal components kept by the projection.
pub const DEFAULT_PROJECTION_COMPONENTS: usize = 16;

const POWER_ITERATIONS: usize = 100;
const POWER_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record_id: i64,
    pub embedding: Embedding,
    pub identity: Option<IdentityId>,
    /// Embedding in projected coordinates, when the projection is active.
    pub projected: Option<Vec<f32>>,
}

/// Linear projection onto the leading principal components of the cached set.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    mean: Vec<f32>,
    components: Vec<Vec<f32>>,
}

impl Projection {
    /// Fit up to `components` principal axes to `samples` by power iteration
    /// with deflation. Returns `None` for an empty sample set.
    pub fn fit(samples: &[&[f32]], components: usize) -> Option<Self> {
        let first = samples.first()?;
        let dimension = first.len();
        if dimension == 0 || components == 0 {
            return None;
        }

        let n = samples.len() as f32;
        let mut mean = vec![0.0f32; dimension];
        for s in samples {
            for (m, v) in mean.iter_mut().zip(s.iter()) {
                *m += v / n;
            }
        }
        let centered: Vec<Vec<f32>> = samples
            .iter()
            .map(|s| s.iter().zip(&mean).map(|(v, m)| v - m).collect())
            .collect();

        let mut axes: Vec<Vec<f32>> = Vec::new();
        for k in 0..components.min(dimension) {
            let mut v = vec![0.0f32; dimension];
            v[k] = 1.0;
            // Start from the sample with the most residual variance.
            if let Some(seed) = centered
                .iter()
                .map(|c| orthogonalize(c.clone(), &axes))
                .max_by(|a, b| norm(a).total_cmp(&norm(b)))
            {
                if norm(&seed) > POWER_TOLERANCE {
                    v = seed;
                }
            }
            v = orthogonalize(v, &axes);
            if !normalize(&mut v) {
                break;
            }

            for _ in 0..POWER_ITERATIONS {
                let mut next = covariance_times(&centered, &v);
                next = orthogonalize(next, &axes);
                if !normalize(&mut next) {
                    break;
                }
                let delta: f32 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
                v = next;
                if delta < POWER_TOLERANCE {
                    break;
                }
            }
            axes.push(v);
        }

        Some(Self { mean, components: axes })
    }

    pub fn components(&self) -> usize {
        self.components.len()
    }

    pub fn project(&self, values: &[f32]) -> Vec<f32> {
        self.components
            .iter()
            .map(|axis| {
                axis.iter()
                    .zip(values.iter().zip(&self.mean))
                    .map(|(a, (v, m))| a * (v - m))
                    .sum()
            })
            .collect()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn normalize(v: &mut [f32]) -> bool {
    let n = norm(v);
    if n <= POWER_TOLERANCE {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= n);
    true
}

fn orthogonalize(mut v: Vec<f32>, axes: &[Vec<f32>]) -> Vec<f32> {
    for axis in axes {
        let dot: f32 = v.iter().zip(axis).map(|(a, b)| a * b).sum();
        v.iter_mut().zip(axis).for_each(|(x, a)| *x -= dot * a);
    }
    v
}

/// `(Xᵀ X) v` for centered rows `X`.
fn covariance_times(centered: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; v.len()];
    for row in centered {
        let dot: f32 = row.iter().zip(v).map(|(a, b)| a * b).sum();
        out.iter_mut().zip(row).for_each(|(o, r)| *o += dot * r);
    }
    out
}

/// Immutable view of one context's embeddings at a given generation.
#[derive(Debug)]
pub struct CacheSnapshot {
    generation: u64,
    entries: HashMap<TagKey, CacheEntry>,
    projection: Option<Projection>,
}

impl CacheSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tag_key: &TagKey) -> Option<&CacheEntry> {
        self.entries.get(tag_key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TagKey, &CacheEntry)> {
        self.entries.iter()
    }

    /// Trained (identity, embedding) pairs, ordered by record id.
    pub fn known_pairs(&self) -> Vec<(IdentityId, &Embedding)> {
        let mut known: Vec<&CacheEntry> = self.entries.values().filter(|e| e.identity.is_some()).collect();
        known.sort_by_key(|e| e.record_id);
        known
            .into_iter()
            .filter_map(|e| e.identity.map(|id| (id, &e.embedding)))
            .collect()
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }
}

pub struct EmbeddingCache {
    store: Arc<dyn EmbeddingStore>,
    context: String,
    projection_max_items: usize,
    projection_components: usize,
    generation: AtomicU64,
    current: RwLock<Option<Arc<CacheSnapshot>>>,
    rebuild: Mutex<()>,
}

impl EmbeddingCache {
    /// Cache the embeddings of `context`. The projection is computed only
    /// while the cached set has fewer than `projection_max_items` entries.
    pub fn new(store: Arc<dyn EmbeddingStore>, context: impl Into<String>, projection_max_items: usize) -> Self {
        Self {
            store,
            context: context.into(),
            projection_max_items,
            projection_components: DEFAULT_PROJECTION_COMPONENTS,
            generation: AtomicU64::new(0),
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    pub fn with_projection_components(mut self, components: usize) -> Self {
        self.projection_components = components;
        self
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mark the cache stale. The next [`get`](Self::get) rebuilds it.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, context = %self.context, "embedding cache invalidated");
    }

    /// Current snapshot, rebuilding it first if it is stale.
    pub fn get(&self) -> Result<Arc<CacheSnapshot>, StoreError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let _rebuilding = self.rebuild.lock();
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let generation = self.generation();
        let snapshot = Arc::new(self.build(generation)?);
        *self.current.write() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn fresh(&self) -> Option<Arc<CacheSnapshot>> {
        let current = self.current.read();
        current
            .as_ref()
            .filter(|s| s.generation == self.generation())
            .map(Arc::clone)
    }

    fn build(&self, generation: u64) -> Result<CacheSnapshot, StoreError> {
        let mut entries: HashMap<TagKey, CacheEntry> = self
            .store
            .fetch_all()?
            .into_iter()
            .filter(|r| r.context == self.context)
            .map(|r| {
                let entry = CacheEntry {
                    record_id: r.id,
                    embedding: r.embedding,
                    identity: r.identity,
                    projected: None,
                };
                (r.tag_key, entry)
            })
            .collect();

        let projection = if !entries.is_empty() && entries.len() < self.projection_max_items {
            let samples: Vec<&[f32]> = entries.values().map(|e| e.embedding.values.as_slice()).collect();
            Projection::fit(&samples, self.projection_components)
        } else {
            None
        };
        if let Some(projection) = &projection {
            for entry in entries.values_mut() {
                entry.projected = Some(projection.project(&entry.embedding.values));
            }
        }

        tracing::debug!(
            entries = entries.len(),
            generation,
            projected = projection.is_some(),
            context = %self.context,
            "embedding cache rebuilt"
        );
        Ok(CacheSnapshot { generation, entries, projection })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_finds_dominant_axis() {
        let direction = [1.0f32 / 3.0, 2.0 / 3.0, 2.0 / 3.0];
        let points: Vec<Vec<f32>> = (-5..=5)
            .map(|t| {
                let t = t as f32;
                vec![1.0 + t * direction[0], -2.0 + t * direction[1], 0.5 + t * direction[2]]
            })
            .collect();
        let samples: Vec<&[f32]> = points.iter().map(|p| p.as_slice()).collect();

        let projection = Projection::fit(&samples, 1).unwrap();
        assert_eq!(projection.components(), 1);
        let axis = &projection.components[0];
        let alignment: f32 = axis.iter().zip(&direction).map(|(a, d)| a * d).sum();
        assert!(alignment.abs() > 0.99, "alignment {alignment}");

        // Projected coordinates preserve distances along the line.
        let a = projection.project(&points[0])[0];
        let b = projection.project(&points[10])[0];
        assert!(((a - b).abs() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_projection_components_are_orthonormal() {
        let points: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let i = i as f32;
                vec![i, (i * 0.7).sin() * 3.0, (i * 1.3).cos(), i * 0.1]
            })
            .collect();
        let samples: Vec<&[f32]> = points.iter().map(|p| p.as_slice()).collect();
        let projection = Projection::fit(&samples, 3).unwrap();

        for (i, a) in projection.components.iter().enumerate() {
            assert!((norm(a) - 1.0).abs() < 1e-4);
            for b in &projection.components[i + 1..] {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                assert!(dot.abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_projection_of_empty_set() {
        assert!(Projection::fit(&[], 4).is_none());
    }
}
