//! Known/unknown decision over raw index distances.
//!
//! Distances are squared L2, so smaller is closer and a face counts as
//! recognized when `distance <= max_distance`.

use crate::index::Match;
use serde::Serialize;
use thiserror::Error;

/// For unit-norm embeddings squared L2 is `2 - 2·cos`, so 1.0 sits at cosine 0.5.
pub const DEFAULT_MAX_DISTANCE: f32 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("max distance must be a finite, non-negative number (got {0})")]
    InvalidMaxDistance(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchPolicy {
    max_distance: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Outcome for one query embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Decision<L> {
    Recognized { label: L, distance: f32 },
    Unknown { nearest_distance: f32 },
}

impl<L> Decision<L> {
    pub fn is_recognized(&self) -> bool {
        matches!(self, Decision::Recognized { .. })
    }

    pub fn label(&self) -> Option<&L> {
        match self {
            Decision::Recognized { label, .. } => Some(label),
            Decision::Unknown { .. } => None,
        }
    }

    pub fn distance(&self) -> f32 {
        match self {
            Decision::Recognized { distance, .. } => *distance,
            Decision::Unknown { nearest_distance } => *nearest_distance,
        }
    }
}

impl MatchPolicy {
    pub fn new(max_distance: f32) -> Result<Self, PolicyError> {
        if !max_distance.is_finite() || max_distance < 0.0 {
            return Err(PolicyError::InvalidMaxDistance(max_distance));
        }
        Ok(Self { max_distance })
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.max_distance
    }

    /// Decide on the nearest match of a non-empty index.
    pub fn decide<L: Clone>(&self, nearest: &Match<'_, L>) -> Decision<L> {
        if self.accepts(nearest.distance) {
            Decision::Recognized {
                label: nearest.label.clone(),
                distance: nearest.distance,
            }
        } else {
            Decision::Unknown {
                nearest_distance: nearest.distance,
            }
        }
    }
}

/// Map a distance onto (0, 1], larger meaning closer. Display only.
pub fn similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}
