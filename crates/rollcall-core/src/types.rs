use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Slack allowed around 1.0 before an embedding counts as unnormalized.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Face embedding vector (512-dimensional for ArcFace-family models).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "buffalo_l").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Whether the vector is L2-normalized, within `UNIT_NORM_TOLERANCE`.
    pub fn is_unit_norm(&self) -> bool {
        (self.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE
    }
}

/// Who an enrolled embedding belongs to.
///
/// `key` is the store's identity key; `name` is what gets displayed.
/// Neither is required to be unique inside an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub name: String,
}

impl Identity {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

/// An embedding as it sits in durable storage, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredVector {
    /// Raw little-endian f32 bytes.
    Bytes(Vec<u8>),
    /// Base64 text, optionally wrapped in a `\x` hex-escaped bytea.
    Text(String),
}

/// One enrolled row pulled from the roster store for rehydration.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub key: String,
    pub name: String,
    pub vector: StoredVector,
}

/// A face whose embedding was computed outside this workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}
