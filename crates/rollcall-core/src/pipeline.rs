//! Image-to-identity pipeline over external face models.
//!
//! Detection and embedding extraction live outside this workspace; they
//! plug in through [`FaceDetector`] and [`FaceEmbedder`]. A
//! [`RecognitionSession`] owns those collaborators together with the
//! gallery. It is a plain value with a single owner and no locking; a
//! server handling concurrent requests gives each one its own session or
//! wraps it in a mutex.

use crate::gallery::{Gallery, GalleryError};
use crate::policy::Decision;
use crate::types::{BoundingBox, Embedding, Identity};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Locates faces in an image.
pub trait FaceDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, BoxError>;
}

/// Computes an embedding for one detected face.
pub trait FaceEmbedder {
    fn embed(&mut self, image: &DynamicImage, face: &BoundingBox) -> Result<Embedding, BoxError>;
}

impl<F> FaceDetector for F
where
    F: FnMut(&DynamicImage) -> Result<Vec<BoundingBox>, BoxError>,
{
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, BoxError> {
        self(image)
    }
}

impl<F> FaceEmbedder for F
where
    F: FnMut(&DynamicImage, &BoundingBox) -> Result<Embedding, BoxError>,
{
    fn embed(&mut self, image: &DynamicImage, face: &BoundingBox) -> Result<Embedding, BoxError> {
        self(image, face)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("face detector failed: {0}")]
    Detector(#[source] BoxError),
    #[error("face embedder failed: {0}")]
    Embedder(#[source] BoxError),
    #[error("no face detected")]
    NoFaceDetected,
}

/// One face found in a recognition image.
#[derive(Debug, Clone, Serialize)]
pub struct FaceRecognition {
    pub face: BoundingBox,
    pub decision: Decision<Identity>,
}

pub struct RecognitionSession<D, E> {
    detector: D,
    embedder: E,
    gallery: Gallery,
}

impl<D: FaceDetector, E: FaceEmbedder> RecognitionSession<D, E> {
    pub fn new(detector: D, embedder: E, gallery: Gallery) -> Self {
        Self {
            detector,
            embedder,
            gallery,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn gallery_mut(&mut self) -> &mut Gallery {
        &mut self.gallery
    }

    /// Enroll the most confident face in `image` under `identity`.
    ///
    /// Returns the embedding so the caller can persist it.
    pub fn enroll_image(
        &mut self,
        image: &DynamicImage,
        identity: Identity,
    ) -> Result<Embedding, SessionError> {
        let faces = self.detector.detect(image).map_err(SessionError::Detector)?;
        if faces.len() > 1 {
            tracing::warn!(
                faces = faces.len(),
                "enroll: several faces in image, using the most confident"
            );
        }

        let face = faces
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or(SessionError::NoFaceDetected)?;

        tracing::info!(
            key = %identity.key,
            confidence = face.confidence,
            "enroll: face selected"
        );

        let embedding = self
            .embedder
            .embed(image, &face)
            .map_err(SessionError::Embedder)?;
        self.gallery.enroll(identity, &embedding)?;
        Ok(embedding)
    }

    /// Detect every face in `image` and match each against the gallery.
    ///
    /// Faces whose embedding cannot be computed are skipped with a warning.
    pub fn recognize_image(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Vec<FaceRecognition>, SessionError> {
        if self.gallery.is_empty() {
            return Err(GalleryError::NoEnrolledIdentities.into());
        }

        let faces = self.detector.detect(image).map_err(SessionError::Detector)?;
        tracing::debug!(faces = faces.len(), "recognize: faces detected");

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = match self.embedder.embed(image, &face) {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, confidence = face.confidence, "recognize: embedding failed, skipping face");
                    continue;
                }
            };
            let decision = self.gallery.recognize(&embedding)?;
            results.push(FaceRecognition { face, decision });
        }

        tracing::info!(
            faces = results.len(),
            recognized = results.iter().filter(|r| r.decision.is_recognized()).count(),
            "recognize: done"
        );
        Ok(results)
    }
}
