//! Enrolled identities for one recognition session.
//!
//! A [`Gallery`] pairs the flat index with the match policy. It is built
//! empty, filled from the roster store with [`Gallery::rehydrate`], grows
//! by enrollment and is dropped with the session; the store stays the
//! copy of record.

use crate::codec::{self, CodecError};
use crate::index::{FlatIndex, IndexError, NearestIndex};
use crate::policy::{Decision, MatchPolicy};
use crate::types::{Embedding, Identity, StoredEmbedding};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("no identities enrolled")]
    NoEnrolledIdentities,
}

/// Counts from one rehydration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrateReport {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Gallery {
    index: FlatIndex<Identity>,
    policy: MatchPolicy,
}

impl Gallery {
    pub fn new(dimension: usize, policy: MatchPolicy) -> Result<Self, GalleryError> {
        Ok(Self {
            index: FlatIndex::new(dimension)?,
            policy,
        })
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: MatchPolicy) {
        self.policy = policy;
    }

    /// Enrolled identities in enrollment order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.index.iter().map(|(identity, _)| identity)
    }

    /// Load stored rows into the index.
    ///
    /// A row whose vector cannot be decoded to this gallery's dimension is
    /// skipped with a warning; the rest still load.
    pub fn rehydrate<I>(&mut self, records: I) -> RehydrateReport
    where
        I: IntoIterator<Item = StoredEmbedding>,
    {
        let mut report = RehydrateReport::default();

        for record in records {
            let result = codec::decode_embedding(&record.vector, self.dimension())
                .map_err(RehydrateSkip::Codec)
                .and_then(|values| {
                    self.index
                        .add(values, Identity::new(&record.key, &record.name))
                        .map_err(RehydrateSkip::Index)
                });

            match result {
                Ok(()) => report.loaded += 1,
                Err(reason) => {
                    tracing::warn!(
                        key = %record.key,
                        name = %record.name,
                        reason = %reason,
                        "skipping stored embedding"
                    );
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            enrolled = self.len(),
            "gallery rehydrated"
        );
        report
    }

    /// Check `embedding` against the gallery's dimension without enrolling it.
    pub fn validate(&self, embedding: &Embedding) -> Result<(), GalleryError> {
        Ok(self.index.validate(&embedding.values)?)
    }

    /// Add `embedding` under `identity`.
    ///
    /// Vectors that are not unit-norm are accepted with a warning.
    pub fn enroll(&mut self, identity: Identity, embedding: &Embedding) -> Result<(), GalleryError> {
        self.index.validate(&embedding.values)?;
        if !embedding.is_unit_norm() {
            tracing::warn!(
                key = %identity.key,
                norm = embedding.norm(),
                "enrolling an embedding that is not unit-norm"
            );
        }
        self.index.add(embedding.values.clone(), identity)?;
        tracing::debug!(enrolled = self.len(), "identity enrolled");
        Ok(())
    }

    /// Nearest enrolled identity for `embedding`, judged by the policy.
    ///
    /// An empty gallery is a precondition failure, not an unknown face.
    pub fn recognize(&self, embedding: &Embedding) -> Result<Decision<Identity>, GalleryError> {
        let nearest = self
            .index
            .nearest(&embedding.values)?
            .ok_or(GalleryError::NoEnrolledIdentities)?;
        Ok(self.policy.decide(&nearest))
    }
}

#[derive(Error, Debug)]
enum RehydrateSkip {
    #[error(transparent)]
    Codec(CodecError),
    #[error(transparent)]
    Index(IndexError),
}
