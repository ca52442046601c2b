//! rollcall-core — Face matching for attendance.
//!
//! Keeps enrolled face embeddings in a flat index, answers nearest-identity
//! queries by squared L2 distance and applies the known/unknown policy.
//! Face detection and embedding extraction are external collaborators.

pub mod codec;
pub mod gallery;
pub mod index;
pub mod pipeline;
pub mod policy;
pub mod types;

pub use gallery::{Gallery, GalleryError, RehydrateReport};
pub use index::{FlatIndex, IndexError, Match, NearestIndex, ARCFACE_DIMENSION};
pub use pipeline::{FaceDetector, FaceEmbedder, FaceRecognition, RecognitionSession, SessionError};
pub use policy::{Decision, MatchPolicy, DEFAULT_MAX_DISTANCE};
pub use types::{
    BoundingBox, DetectedFace, Embedding, Identity, StoredEmbedding, StoredVector,
    UNIT_NORM_TOLERANCE,
};
