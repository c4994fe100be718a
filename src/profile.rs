use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use facegate_match::QualitySignals;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALGORITHM_TAG: &str = "face-api.js";
pub const DEFAULT_MODEL_VERSION: &str = "1.0";
pub const DEFAULT_CAPTURE_CONFIDENCE: f64 = 0.95;

/// Opaque handle to raw evidence held by a [`crate::storage::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRef(pub String);

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw capture supplied alongside an enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub bytes: Vec<u8>,
    /// File extension without the dot, e.g. `jpg`.
    pub extension: String,
}

/// Metadata accompanying a descriptor on register/update.
///
/// Fields read by the core are typed; anything else goes in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileMetadata {
    pub confidence: f64,
    pub algorithm_tag: String,
    pub model_version: String,
    pub device_info: Option<String>,
    pub signals: QualitySignals,
    pub extra: BTreeMap<String, String>,
}

impl Default for ProfileMetadata {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CAPTURE_CONFIDENCE,
            algorithm_tag: DEFAULT_ALGORITHM_TAG.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            device_info: None,
            signals: QualitySignals::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl ProfileMetadata {
    pub fn with_confidence(confidence: f64) -> Self {
        Self {
            confidence,
            ..Self::default()
        }
    }

    /// Quality signals with the capture confidence filled in.
    pub fn quality_signals(&self) -> QualitySignals {
        QualitySignals {
            confidence: Some(self.confidence),
            ..self.signals.clone()
        }
    }
}

/// Summary of what accompanied the descriptor at enrollment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFeatures {
    pub descriptor_len: usize,
    pub has_face_bounds: bool,
    pub has_pose: bool,
}

/// The single active face enrollment of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceProfile {
    pub identity_id: String,
    pub descriptor: Vec<f64>,
    pub algorithm_tag: String,
    pub model_version: String,
    pub confidence: f64,
    pub quality_score: f64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub update_count: u32,
    pub raw_evidence_ref: Option<EvidenceRef>,
    pub device_info: Option<String>,
    pub features: ProfileFeatures,
    pub extra: BTreeMap<String, String>,
}

impl FaceProfile {
    pub(crate) fn new(
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        quality_score: f64,
        evidence: Option<EvidenceRef>,
        now: DateTime<Utc>,
    ) -> Self {
        let features = ProfileFeatures {
            descriptor_len: descriptor.len(),
            has_face_bounds: metadata.signals.face_bounds.is_some(),
            has_pose: metadata.signals.pose.is_some(),
        };
        Self {
            identity_id: identity_id.to_string(),
            descriptor,
            algorithm_tag: metadata.algorithm_tag,
            model_version: metadata.model_version,
            confidence: metadata.confidence,
            quality_score,
            registered_at: now,
            updated_at: now,
            update_count: 0,
            raw_evidence_ref: evidence,
            device_info: metadata.device_info,
            features,
            extra: metadata.extra,
        }
    }

    /// Build the replacement for `self`, keeping registration time and history.
    pub(crate) fn superseded_by(
        &self,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        quality_score: f64,
        evidence: Option<EvidenceRef>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = Self::new(
            &self.identity_id,
            descriptor,
            metadata,
            quality_score,
            evidence.or_else(|| self.raw_evidence_ref.clone()),
            now,
        );
        next.registered_at = self.registered_at;
        next.update_count = self.update_count.saturating_add(1);
        next
    }
}

impl AsRef<[f64]> for FaceProfile {
    fn as_ref(&self) -> &[f64] {
        &self.descriptor
    }
}
