//! One verification attempt, from raw probe to audited decision.
//!
//! ```text
//! Start -> Validated -> LivenessChecked -> Matched -> ConstraintsChecked -> Accepted
//!            \______________\__________________\_____________\__________> Rejected
//! ```
//!
//! Nothing is written before a terminal stage, so a caller may abandon an
//! attempt at any point. Each attempt appends exactly one audit event.

use std::sync::Arc;

use facegate_match::{DescriptorRules, LivenessPolicy, LivenessSignals, QualitySignals, QualityWeights};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::constraints::VerifyConstraints;
use crate::error::{ErrorKind, FaceError, FaceResult};
use crate::event::{AuditTrail, EventAction, EventContext, VerificationEvent};
use crate::index::{EnrolledIndex, IndexMatch};
use crate::profile::DEFAULT_CAPTURE_CONFIDENCE;
use crate::storage::IdentityRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    Start,
    Validated,
    LivenessChecked,
    Matched,
    ConstraintsChecked,
    Accepted,
    Rejected,
}

/// A probe and the capture signals that came with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationRequest {
    pub descriptor: Vec<f64>,
    pub confidence: f64,
    pub quality: QualitySignals,
    pub liveness: LivenessSignals,
    pub context: EventContext,
}

impl Default for VerificationRequest {
    fn default() -> Self {
        Self {
            descriptor: Vec::new(),
            confidence: DEFAULT_CAPTURE_CONFIDENCE,
            quality: QualitySignals::default(),
            liveness: LivenessSignals::default(),
            context: EventContext::default(),
        }
    }
}

impl VerificationRequest {
    pub fn new(descriptor: Vec<f64>) -> Self {
        Self {
            descriptor,
            ..Self::default()
        }
    }
}

/// Per-call overrides. `None` falls back to the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VerifyOptions {
    pub threshold: Option<f64>,
    pub require_liveness: Option<bool>,
    pub constraints: Option<VerifyConstraints>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub accepted: bool,
    /// Only set on acceptance.
    pub identity_id: Option<String>,
    /// Best similarity observed, 0 when nothing matched.
    pub similarity: f64,
    pub liveness_score: Option<f64>,
    pub quality_score: f64,
    pub reason: Option<ErrorKind>,
    /// Human readable rejection detail.
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifySettings {
    pub rules: DescriptorRules,
    pub liveness: LivenessPolicy,
    pub quality: QualityWeights,
    pub threshold: f64,
    pub require_liveness: bool,
}

/// Per-probe result of [`Verifier::batch_verify`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub matched: bool,
    pub identity_id: Option<String>,
    pub similarity: f64,
    pub error: Option<String>,
}

/// What an attempt learned before it terminated.
#[derive(Debug)]
struct Attempt {
    stage: VerifyStage,
    liveness_score: Option<f64>,
    quality_score: f64,
    best: Option<IndexMatch>,
}

impl Attempt {
    fn advance(&mut self, stage: VerifyStage) {
        debug!("Verification stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn best_similarity(&self) -> f64 {
        self.best.as_ref().map(|m| m.similarity).unwrap_or(0.0)
    }
}

pub struct Verifier {
    index: EnrolledIndex,
    repository: Arc<dyn IdentityRepository>,
    audit: Arc<AuditTrail>,
    settings: VerifySettings,
}

impl Verifier {
    pub fn new(
        index: EnrolledIndex,
        repository: Arc<dyn IdentityRepository>,
        audit: Arc<AuditTrail>,
        settings: VerifySettings,
    ) -> Self {
        Self {
            index,
            repository,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifySettings {
        &self.settings
    }

    pub fn verify(&self, request: &VerificationRequest, options: &VerifyOptions) -> VerificationResult {
        let mut attempt = Attempt {
            stage: VerifyStage::Start,
            liveness_score: None,
            quality_score: 0.0,
            best: None,
        };

        let outcome = self.run(request, options, &mut attempt);
        match outcome {
            Ok(matched) => self.accept(request, attempt, matched),
            Err(err) => self.reject(request, attempt, err),
        }
    }

    fn run(
        &self,
        request: &VerificationRequest,
        options: &VerifyOptions,
        attempt: &mut Attempt,
    ) -> FaceResult<IndexMatch> {
        self.settings
            .rules
            .validate(&request.descriptor, request.confidence)?;
        attempt.quality_score = QualitySignals {
            confidence: Some(request.confidence),
            ..request.quality.clone()
        }
        .score(&self.settings.quality);
        attempt.advance(VerifyStage::Validated);

        if options
            .require_liveness
            .unwrap_or(self.settings.require_liveness)
        {
            let assessment = self.settings.liveness.assess(&request.liveness);
            attempt.liveness_score = Some(assessment.score);
            if !assessment.is_live {
                return Err(FaceError::LivenessFailed {
                    score: assessment.score,
                    threshold: self.settings.liveness.anti_spoofing_threshold,
                });
            }
        }
        attempt.advance(VerifyStage::LivenessChecked);

        let threshold = options
            .threshold
            .filter(|t| t.is_finite())
            .unwrap_or(self.settings.threshold);
        attempt.best = self.index.best_match(&request.descriptor)?;
        let matched = match &attempt.best {
            Some(best) if best.similarity >= threshold => best.clone(),
            _ => {
                return Err(FaceError::NoMatch {
                    best_similarity: attempt.best_similarity(),
                })
            }
        };
        attempt.advance(VerifyStage::Matched);

        if !self.repository.is_active(&matched.identity_id)? {
            return Err(FaceError::InactiveIdentity {
                identity_id: matched.identity_id,
            });
        }
        if let Some(constraints) = &options.constraints {
            let rules = self.repository.constraints(&matched.identity_id)?;
            constraints
                .check(&rules)
                .map_err(|reason| FaceError::ConstraintViolation {
                    identity_id: matched.identity_id.clone(),
                    reason,
                })?;
        }
        attempt.advance(VerifyStage::ConstraintsChecked);

        Ok(matched)
    }

    fn accept(
        &self,
        request: &VerificationRequest,
        mut attempt: Attempt,
        matched: IndexMatch,
    ) -> VerificationResult {
        attempt.advance(VerifyStage::Accepted);
        info!(
            "Verified {} (similarity {:.3})",
            matched.identity_id, matched.similarity
        );

        self.audit.record(
            VerificationEvent::new(
                EventAction::VerifySuccess,
                Some(&matched.identity_id),
                request.context.clone(),
            )
            .similarity(matched.similarity)
            .liveness(attempt.liveness_score)
            .quality(attempt.quality_score),
        );

        VerificationResult {
            accepted: true,
            identity_id: Some(matched.identity_id),
            similarity: matched.similarity,
            liveness_score: attempt.liveness_score,
            quality_score: attempt.quality_score,
            reason: None,
            message: None,
        }
    }

    fn reject(
        &self,
        request: &VerificationRequest,
        mut attempt: Attempt,
        err: FaceError,
    ) -> VerificationResult {
        let failed_at = attempt.stage;
        attempt.advance(VerifyStage::Rejected);
        let reason = err.kind();
        warn!("Verification rejected after {:?}: {}", failed_at, err);

        // The candidate id is kept for the audit trail only.
        let candidate = attempt.best.as_ref().map(|m| m.identity_id.as_str());
        self.audit.record(
            VerificationEvent::new(EventAction::VerifyFailed, candidate, request.context.clone())
                .similarity(attempt.best_similarity())
                .liveness(attempt.liveness_score)
                .quality(attempt.quality_score)
                .reason(reason),
        );

        VerificationResult {
            accepted: false,
            identity_id: None,
            similarity: attempt.best_similarity(),
            liveness_score: attempt.liveness_score,
            quality_score: attempt.quality_score,
            reason: Some(reason),
            message: Some(err.to_string()),
        }
    }

    /// Match many probes against one snapshot without liveness, constraints
    /// or audit. For reconciliation, never for access decisions.
    pub fn batch_verify(&self, probes: &[Vec<f64>], threshold: f64) -> FaceResult<Vec<BatchOutcome>> {
        let snapshot = self.index.snapshot()?;
        debug!(
            "Batch verifying {} probes against {} enrolled identities",
            probes.len(),
            snapshot.len()
        );

        let outcomes = probes
            .iter()
            .enumerate()
            .map(|(index, probe)| {
                if let Err(err) = self.settings.rules.validate_shape(probe) {
                    return BatchOutcome {
                        index,
                        matched: false,
                        identity_id: None,
                        similarity: 0.0,
                        error: Some(err.to_string()),
                    };
                }
                match snapshot.best_match(probe) {
                    Some(best) if best.similarity >= threshold => BatchOutcome {
                        index,
                        matched: true,
                        identity_id: Some(best.identity_id),
                        similarity: best.similarity,
                        error: None,
                    },
                    best => BatchOutcome {
                        index,
                        matched: false,
                        identity_id: None,
                        similarity: best.map(|b| b.similarity).unwrap_or(0.0),
                        error: None,
                    },
                }
            })
            .collect();
        Ok(outcomes)
    }
}
