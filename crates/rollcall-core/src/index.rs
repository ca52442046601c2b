//! Flat embedding index with exact nearest-neighbour search.
//!
//! Every query is a brute-force scan computing the squared Euclidean
//! distance to each enrolled vector, O(n·d). That is fine for the tens to
//! low hundreds of identities one roster holds. Larger galleries should
//! get a spatial index behind [`NearestIndex`] instead.

use thiserror::Error;

/// Embedding length produced by ArcFace-family recognition models.
pub const ARCFACE_DIMENSION: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("index dimension must be positive")]
    ZeroDimension,
    #[error("vector has {actual} components, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector component {position} is not finite")]
    NonFinite { position: usize },
}

/// Closest enrolled entry for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a, L> {
    /// Insertion position of the entry.
    pub position: usize,
    pub label: &'a L,
    /// Squared L2 distance. Smaller is closer; 0.0 is an identical vector.
    pub distance: f32,
}

/// The add/match contract every gallery implementation must honour.
///
/// Implementations are append-only. `nearest` returns `Ok(None)` only
/// when nothing has been added, and among exact ties returns the entry
/// that was added first.
pub trait NearestIndex<L> {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, vector: Vec<f32>, label: L) -> Result<(), IndexError>;

    fn nearest(&self, query: &[f32]) -> Result<Option<Match<'_, L>>, IndexError>;
}

/// Squared Euclidean distance. Callers guarantee equal lengths.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Insertion-ordered gallery of `(label, vector)` pairs.
#[derive(Debug, Clone)]
pub struct FlatIndex<L> {
    dimension: usize,
    labels: Vec<L>,
    vectors: Vec<Vec<f32>>,
}

impl<L> FlatIndex<L> {
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            labels: Vec::new(),
            vectors: Vec::new(),
        })
    }

    /// Iterate enrolled entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&L, &[f32])> {
        self.labels
            .iter()
            .zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// The `k` closest entries, nearest first. Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match<'_, L>>, IndexError> {
        self.validate(query)?;

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        // Stable sort: equal distances stay in insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, distance)| Match {
                position,
                label: &self.labels[position],
                distance,
            })
            .collect())
    }

    /// Check that `vector` could be added or queried.
    pub fn validate(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            return Err(IndexError::NonFinite { position });
        }
        Ok(())
    }
}

impl<L> NearestIndex<L> for FlatIndex<L> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn add(&mut self, vector: Vec<f32>, label: L) -> Result<(), IndexError> {
        self.validate(&vector)?;
        self.labels.push(label);
        self.vectors.push(vector);
        Ok(())
    }

    fn nearest(&self, query: &[f32]) -> Result<Option<Match<'_, L>>, IndexError> {
        self.validate(query)?;

        let mut best: Option<(usize, f32)> = None;
        // Full scan, no early exit. Strict `<` keeps the first of equal entries.
        for (i, v) in self.vectors.iter().enumerate() {
            let d = squared_l2(query, v);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }

        Ok(best.map(|(position, distance)| Match {
            position,
            label: &self.labels[position],
            distance,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(entries: &[(&str, [f32; 4])]) -> FlatIndex<String> {
        let mut index = FlatIndex::new(4).unwrap();
        for (label, v) in entries {
            index.add(v.to_vec(), label.to_string()).unwrap();
        }
        index
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert_eq!(
            FlatIndex::<String>::new(0).unwrap_err(),
            IndexError::ZeroDimension
        );
    }

    #[test]
    fn test_empty_index_has_no_match() {
        let index: FlatIndex<String> = FlatIndex::new(4).unwrap();
        assert!(index.is_empty());
        assert!(index.nearest(&[0.3, 0.1, 0.0, 9.0]).unwrap().is_none());
        assert!(index.search(&[0.0; 4], 3).unwrap().is_empty());
    }

    #[test]
    fn test_exact_match_has_zero_distance() {
        let v = [0.25, -0.5, 0.75, 1.0];
        let index = index_of(&[("A", v)]);
        let m = index.nearest(&v).unwrap().unwrap();
        assert_eq!(m.label, "A");
        assert_eq!(m.distance, 0.0);
        assert_eq!(m.position, 0);
    }

    #[test]
    fn test_nearest_wins() {
        let index = index_of(&[("A", [1.0, 0.0, 0.0, 0.0]), ("B", [0.0, 0.0, 5.0, 0.0])]);
        let q = [0.8, 0.0, 0.0, 0.0];
        let m = index.nearest(&q).unwrap().unwrap();
        assert_eq!(m.label, "A");
        assert!((m.distance - squared_l2(&q, &[1.0, 0.0, 0.0, 0.0])).abs() < 1e-6);
    }

    #[test]
    fn test_alice_bob_scenario() {
        let index = index_of(&[("Alice", [1.0, 0.0, 0.0, 0.0]), ("Bob", [0.0, 1.0, 0.0, 0.0])]);
        let m = index.nearest(&[0.9, 0.1, 0.0, 0.0]).unwrap().unwrap();
        assert_eq!(m.label, "Alice");
        assert!((m.distance - 0.02).abs() < 1e-6, "got {}", m.distance);
    }

    #[test]
    fn test_ties_resolve_to_first_added() {
        let index = index_of(&[
            ("first", [1.0, 0.0, 0.0, 0.0]),
            ("second", [-1.0, 0.0, 0.0, 0.0]),
        ]);
        // Origin is equidistant from both.
        for _ in 0..5 {
            let m = index.nearest(&[0.0; 4]).unwrap().unwrap();
            assert_eq!(m.label, "first");
            assert_eq!(m.position, 0);
        }
    }

    #[test]
    fn test_duplicate_labels_are_independent_entries() {
        let index = index_of(&[("A", [1.0, 0.0, 0.0, 0.0]), ("A", [0.0, 1.0, 0.0, 0.0])]);
        assert_eq!(index.len(), 2);
        let m = index.nearest(&[0.0, 1.0, 0.0, 0.0]).unwrap().unwrap();
        assert_eq!(m.label, "A");
        assert_eq!(m.position, 1);
    }

    #[test]
    fn test_insertion_order_does_not_change_minimum() {
        let entries = [
            ("A", [1.0, 2.0, 3.0, 4.0]),
            ("B", [0.0, 0.5, 0.0, 1.0]),
            ("C", [-2.0, 1.0, 0.0, 0.0]),
            ("D", [0.1, 0.4, 0.2, 0.9]),
        ];
        let q = [0.0, 0.5, 0.1, 1.0];
        let forward = index_of(&entries);
        let mut reversed_entries = entries;
        reversed_entries.reverse();
        let reversed = index_of(&reversed_entries);

        let a = forward.nearest(&q).unwrap().unwrap();
        let b = reversed.nearest(&q).unwrap().unwrap();
        assert_eq!(a.label, b.label);
        assert_eq!(a.distance, b.distance);
    }

    #[test]
    fn test_growth_and_labels_come_from_adds() {
        let mut index = FlatIndex::new(2).unwrap();
        for i in 0..20 {
            index.add(vec![i as f32, (i * 2) as f32], format!("id{i}")).unwrap();
            assert_eq!(index.len(), i + 1);
        }
        let all = index.search(&[3.1, 6.1], 100).unwrap();
        assert_eq!(all.len(), 20);
        assert!(all.iter().all(|m| m.label.starts_with("id")));
        assert_eq!(all[0].label, "id3");
    }

    #[test]
    fn test_search_orders_by_distance_then_insertion() {
        let index = index_of(&[
            ("far", [4.0, 0.0, 0.0, 0.0]),
            ("tie1", [0.0, 1.0, 0.0, 0.0]),
            ("tie2", [0.0, -1.0, 0.0, 0.0]),
            ("exact", [0.0, 0.0, 0.0, 0.0]),
        ]);
        let labels: Vec<&str> = index
            .search(&[0.0; 4], 3)
            .unwrap()
            .into_iter()
            .map(|m| m.label.as_str())
            .collect();
        assert_eq!(labels, vec!["exact", "tie1", "tie2"]);
    }

    #[test]
    fn test_dimension_mismatch_on_add_leaves_index_unchanged() {
        let mut index: FlatIndex<String> = FlatIndex::new(4).unwrap();
        let err = index.add(vec![1.0, 2.0, 3.0], "short".into()).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 4, actual: 3 });
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_on_query() {
        let index = index_of(&[("A", [1.0, 0.0, 0.0, 0.0])]);
        let err = index.nearest(&[1.0; 5]).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 4, actual: 5 });
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut index: FlatIndex<String> = FlatIndex::new(2).unwrap();
        let err = index.add(vec![0.0, f32::NAN], "nan".into()).unwrap_err();
        assert_eq!(err, IndexError::NonFinite { position: 1 });
        assert!(index.nearest(&[f32::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn test_iter_preserves_insertion_order() {
        let index = index_of(&[("x", [0.0; 4]), ("y", [1.0; 4])]);
        let labels: Vec<&String> = index.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["x", "y"]);
    }

    #[test]
    fn test_arcface_dimension_index() {
        let mut index = FlatIndex::new(ARCFACE_DIMENSION).unwrap();
        let mut v = vec![0.0f32; ARCFACE_DIMENSION];
        v[7] = 1.0;
        index.add(v.clone(), "one-hot").unwrap();
        let m = index.nearest(&v).unwrap().unwrap();
        assert_eq!(*m.label, "one-hot");
        assert_eq!(index.dimension(), ARCFACE_DIMENSION);
    }
}
