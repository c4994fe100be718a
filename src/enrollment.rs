//! Register, update and delete face enrollments.
//!
//! Evidence is written first and discarded again if the profile write fails.
//! Backups are history and stay behind even when the save or remove that
//! follows them fails; they then hold the profile that is still committed.
//! Mutations on one identity are serialised; different identities run in
//! parallel. A committed mutation invalidates the enrolled index before the
//! call returns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use facegate_match::{DescriptorRules, QualityWeights};
use log::{info, warn};
use parking_lot::Mutex;

use crate::error::{FaceError, FaceResult};
use crate::event::{AuditTrail, EventAction, EventContext, VerificationEvent};
use crate::index::EnrolledIndex;
use crate::profile::{Evidence, EvidenceRef, FaceProfile, ProfileMetadata};
use crate::storage::{BlobStore, IdentityRepository};

pub struct EnrollmentManager {
    repository: Arc<dyn IdentityRepository>,
    blobs: Arc<dyn BlobStore>,
    index: EnrolledIndex,
    audit: Arc<AuditTrail>,
    rules: DescriptorRules,
    weights: QualityWeights,
    /// Locks of identities with a mutation in flight.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EnrollmentManager {
    pub fn new(
        repository: Arc<dyn IdentityRepository>,
        blobs: Arc<dyn BlobStore>,
        index: EnrolledIndex,
        audit: Arc<AuditTrail>,
        rules: DescriptorRules,
        weights: QualityWeights,
    ) -> Self {
        Self {
            repository,
            blobs,
            index,
            audit,
            rules,
            weights,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Enroll a first face for `identity_id`. Never overwrites.
    pub fn register(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        check_identity_id(identity_id)?;
        self.rules.validate(&descriptor, metadata.confidence)?;
        self.locked(identity_id, || {
            self.register_locked(identity_id, descriptor, metadata, evidence)
        })
    }

    fn register_locked(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        if self.repository.load_one(identity_id)?.is_some() {
            return Err(FaceError::AlreadyEnrolled {
                identity_id: identity_id.to_string(),
            });
        }

        let quality = metadata.quality_signals().score(&self.weights);
        let context = context_of(&metadata);
        let stored = self.store_evidence(identity_id, evidence)?;
        let profile = FaceProfile::new(
            identity_id,
            descriptor,
            metadata,
            quality,
            stored.clone(),
            Utc::now(),
        );

        if let Err(err) = self.repository.save(&profile) {
            self.discard_evidence(stored.as_ref());
            return Err(err.into());
        }
        self.index.invalidate();

        info!(
            "Registered face for {} (quality {:.3})",
            identity_id, profile.quality_score
        );
        self.audit.record(
            VerificationEvent::new(EventAction::Register, Some(identity_id), context)
                .quality(profile.quality_score),
        );
        Ok(profile)
    }

    /// Replace the enrolled face of `identity_id`, keeping a backup of the old one.
    ///
    /// Without new evidence the previous evidence reference is carried over.
    pub fn update(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        check_identity_id(identity_id)?;
        self.rules.validate(&descriptor, metadata.confidence)?;
        self.locked(identity_id, || {
            self.update_locked(identity_id, descriptor, metadata, evidence)
        })
    }

    fn update_locked(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        let previous = self.require_profile(identity_id)?;
        let quality = metadata.quality_signals().score(&self.weights);
        let context = context_of(&metadata);
        let stored = self.store_evidence(identity_id, evidence)?;

        let next = previous.superseded_by(descriptor, metadata, quality, stored.clone(), Utc::now());
        let committed = self
            .repository
            .backup(&previous)
            .and_then(|_| self.repository.save(&next));
        if let Err(err) = committed {
            self.discard_evidence(stored.as_ref());
            return Err(err.into());
        }
        self.index.invalidate();

        if stored.is_some() && previous.raw_evidence_ref != next.raw_evidence_ref {
            self.discard_evidence(previous.raw_evidence_ref.as_ref());
        }

        info!(
            "Updated face for {} (update #{}, quality {:.3})",
            identity_id, next.update_count, next.quality_score
        );
        self.audit.record(
            VerificationEvent::new(EventAction::Update, Some(identity_id), context)
                .quality(next.quality_score),
        );
        Ok(next)
    }

    /// Remove the enrolled face of `identity_id` after backing it up.
    pub fn delete(&self, identity_id: &str) -> FaceResult<()> {
        check_identity_id(identity_id)?;
        self.locked(identity_id, || self.delete_locked(identity_id))
    }

    fn delete_locked(&self, identity_id: &str) -> FaceResult<()> {
        let previous = self.require_profile(identity_id)?;
        self.repository.backup(&previous)?;
        self.repository.remove(identity_id)?;
        self.index.invalidate();

        self.discard_evidence(previous.raw_evidence_ref.as_ref());

        info!("Deleted face for {}", identity_id);
        self.audit.record(VerificationEvent::new(
            EventAction::Delete,
            Some(identity_id),
            EventContext::default(),
        ));
        Ok(())
    }

    pub fn profile(&self, identity_id: &str) -> FaceResult<Option<FaceProfile>> {
        Ok(self.repository.load_one(identity_id)?)
    }

    /// Raw evidence bytes for the current enrollment, if any were stored.
    pub fn evidence(&self, identity_id: &str) -> FaceResult<Option<Vec<u8>>> {
        let profile = self.require_profile(identity_id)?;
        match &profile.raw_evidence_ref {
            Some(reference) => Ok(Some(self.blobs.get(reference)?)),
            None => Ok(None),
        }
    }

    fn require_profile(&self, identity_id: &str) -> FaceResult<FaceProfile> {
        self.repository
            .load_one(identity_id)?
            .ok_or_else(|| FaceError::NotEnrolled {
                identity_id: identity_id.to_string(),
            })
    }

    /// Run `mutation` while holding the lock of `identity_id`.
    ///
    /// Handles are only cloned or dropped under the table lock, so the last
    /// one out sees a count of one and removes the entry.
    fn locked<T>(
        &self,
        identity_id: &str,
        mutation: impl FnOnce() -> FaceResult<T>,
    ) -> FaceResult<T> {
        let lock = Arc::clone(self.locks.lock().entry(identity_id.to_string()).or_default());
        let result = {
            let _guard = lock.lock();
            mutation()
        };

        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(identity_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(identity_id);
        }
        result
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    fn store_evidence(
        &self,
        identity_id: &str,
        evidence: Option<&Evidence>,
    ) -> FaceResult<Option<EvidenceRef>> {
        match evidence {
            Some(evidence) => Ok(Some(self.blobs.put(identity_id, evidence)?)),
            None => Ok(None),
        }
    }

    // Blob cleanup never fails the surrounding operation.
    fn discard_evidence(&self, reference: Option<&EvidenceRef>) {
        if let Some(reference) = reference {
            if let Err(err) = self.blobs.delete(reference) {
                warn!("Failed to remove evidence {}: {}", reference, err);
            }
        }
    }
}

fn check_identity_id(identity_id: &str) -> FaceResult<()> {
    if identity_id.trim().is_empty() {
        return Err(FaceError::InvalidIdentity {
            identity_id: identity_id.to_string(),
        });
    }
    Ok(())
}

fn context_of(metadata: &ProfileMetadata) -> EventContext {
    EventContext {
        ip_address: None,
        device: metadata.device_info.clone(),
    }
}
