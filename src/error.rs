use std::io;
use std::path::PathBuf;

use facegate_match::DescriptorError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a backing collaborator (repository, blob store, audit sink).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("'{0}' is not a valid storage key")]
    InvalidKey(String),

    #[error("evidence {0} not found")]
    MissingEvidence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<postcard::Error> for StoreError {
    fn from(err: postcard::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Fieldless mirror of [`FaceError`], carried in results and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidDescriptor,
    LowConfidence,
    InvalidIdentity,
    AlreadyEnrolled,
    NotEnrolled,
    LivenessFailed,
    NoMatch,
    InactiveIdentity,
    ConstraintViolation,
    IndexUnavailable,
    RepositoryError,
}

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(DescriptorError),

    #[error("capture confidence {confidence:.3} is below the minimum {minimum:.3}")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("'{identity_id}' is not a usable identity id")]
    InvalidIdentity { identity_id: String },

    #[error("identity {identity_id} already has an enrolled face; use update instead")]
    AlreadyEnrolled { identity_id: String },

    #[error("identity {identity_id} has no enrolled face")]
    NotEnrolled { identity_id: String },

    #[error("liveness check failed: score {score:.3} below {threshold:.3}")]
    LivenessFailed { score: f64, threshold: f64 },

    #[error("face not recognised (best similarity {best_similarity:.3})")]
    NoMatch { best_similarity: f64 },

    #[error("identity {identity_id} is not active")]
    InactiveIdentity { identity_id: String },

    #[error("constraint violated for {identity_id}: {reason}")]
    ConstraintViolation { identity_id: String, reason: String },

    #[error("enrolled index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("repository error: {0}")]
    Repository(#[from] StoreError),
}

impl FaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceError::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            FaceError::LowConfidence { .. } => ErrorKind::LowConfidence,
            FaceError::InvalidIdentity { .. } => ErrorKind::InvalidIdentity,
            FaceError::AlreadyEnrolled { .. } => ErrorKind::AlreadyEnrolled,
            FaceError::NotEnrolled { .. } => ErrorKind::NotEnrolled,
            FaceError::LivenessFailed { .. } => ErrorKind::LivenessFailed,
            FaceError::NoMatch { .. } => ErrorKind::NoMatch,
            FaceError::InactiveIdentity { .. } => ErrorKind::InactiveIdentity,
            FaceError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            FaceError::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            FaceError::Repository(_) => ErrorKind::RepositoryError,
        }
    }
}

impl From<DescriptorError> for FaceError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::LowConfidence {
                confidence,
                minimum,
            } => FaceError::LowConfidence {
                confidence,
                minimum,
            },
            other => FaceError::InvalidDescriptor(other),
        }
    }
}

pub type FaceResult<T> = Result<T, FaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_maps_to_its_own_kind() {
        let err = FaceError::from(DescriptorError::LowConfidence {
            confidence: 0.5,
            minimum: 0.7,
        });
        assert_eq!(err.kind(), ErrorKind::LowConfidence);

        let err = FaceError::from(DescriptorError::WrongLength {
            expected: 128,
            actual: 127,
        });
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    }

    #[test]
    fn kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InactiveIdentity).unwrap();
        assert_eq!(json, "\"inactive_identity\"");

        let err = FaceError::InvalidIdentity {
            identity_id: " ".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            "\"invalid_identity\""
        );
    }
}
