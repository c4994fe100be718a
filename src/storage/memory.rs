//! In-process collaborators, for embedding callers and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{AuditSink, BlobStore, IdentityRepository, StoreResult};
use crate::constraints::IdentityConstraints;
use crate::error::StoreError;
use crate::event::VerificationEvent;
use crate::profile::{Evidence, EvidenceRef, FaceProfile};

#[derive(Debug, Clone, Copy, Default)]
struct IdentityRecord {
    active: bool,
    constraints: IdentityConstraints,
}

/// Profiles kept in insertion order; an update keeps the original position.
#[derive(Debug, Default)]
pub struct MemoryIdentityRepository {
    directory: RwLock<BTreeMap<String, IdentityRecord>>,
    profiles: RwLock<Vec<FaceProfile>>,
    backups: RwLock<Vec<FaceProfile>>,
    loads: AtomicUsize,
    load_delay: Mutex<Duration>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
    fail_profile_writes: AtomicBool,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an identity in the directory.
    pub fn add_identity(&self, identity_id: &str, active: bool) {
        let mut directory = self.directory.write();
        let record = directory.entry(identity_id.to_string()).or_default();
        record.active = active;
    }

    pub fn set_constraints(&self, identity_id: &str, constraints: IdentityConstraints) {
        let mut directory = self.directory.write();
        directory
            .entry(identity_id.to_string())
            .or_default()
            .constraints = constraints;
    }

    /// Number of `load_all` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make every `load_all` take at least `delay`.
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock() = delay;
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail `save` and `remove` while `backup` keeps working.
    pub fn fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    pub fn backups(&self) -> Vec<FaceProfile> {
        self.backups.read().clone()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }

    fn check_profile_writable(&self) -> StoreResult<()> {
        self.check_writable()?;
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile write rejected".to_string()));
        }
        Ok(())
    }
}

impl IdentityRepository for MemoryIdentityRepository {
    fn load_all(&self) -> StoreResult<Vec<FaceProfile>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("load rejected".to_string()));
        }
        Ok(self.profiles.read().clone())
    }

    fn load_one(&self, identity_id: &str) -> StoreResult<Option<FaceProfile>> {
        Ok(self
            .profiles
            .read()
            .iter()
            .find(|p| p.identity_id == identity_id)
            .cloned())
    }

    fn is_active(&self, identity_id: &str) -> StoreResult<bool> {
        Ok(self
            .directory
            .read()
            .get(identity_id)
            .map(|r| r.active)
            .unwrap_or(false))
    }

    fn population(&self) -> StoreResult<usize> {
        let directory = self.directory.read();
        let unlisted = self
            .profiles
            .read()
            .iter()
            .filter(|p| !directory.contains_key(&p.identity_id))
            .count();
        Ok(directory.len() + unlisted)
    }

    fn constraints(&self, identity_id: &str) -> StoreResult<IdentityConstraints> {
        Ok(self
            .directory
            .read()
            .get(identity_id)
            .map(|r| r.constraints)
            .unwrap_or_default())
    }

    fn save(&self, profile: &FaceProfile) -> StoreResult<()> {
        self.check_profile_writable()?;
        let mut profiles = self.profiles.write();
        match profiles
            .iter_mut()
            .find(|p| p.identity_id == profile.identity_id)
        {
            Some(existing) => *existing = profile.clone(),
            None => profiles.push(profile.clone()),
        }
        Ok(())
    }

    fn remove(&self, identity_id: &str) -> StoreResult<()> {
        self.check_profile_writable()?;
        self.profiles.write().retain(|p| p.identity_id != identity_id);
        Ok(())
    }

    fn backup(&self, profile: &FaceProfile) -> StoreResult<()> {
        self.check_writable()?;
        self.backups.write().push(profile.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<VerificationEvent>>,
    fail: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VerificationEvent> {
        self.events.read().clone()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &VerificationEvent) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink offline".to_string()));
        }
        self.events.write().push(event.clone());
        Ok(())
    }

    fn events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<VerificationEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<EvidenceRef, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, owner: &str, evidence: &Evidence) -> StoreResult<EvidenceRef> {
        let reference = EvidenceRef(format!(
            "{owner}/{}.{}",
            Uuid::new_v4().simple(),
            evidence.extension
        ));
        self.blobs
            .write()
            .insert(reference.clone(), evidence.bytes.clone());
        Ok(reference)
    }

    fn get(&self, reference: &EvidenceRef) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::MissingEvidence(reference.to_string()))
    }

    fn delete(&self, reference: &EvidenceRef) -> StoreResult<()> {
        self.blobs.write().remove(reference);
        Ok(())
    }
}
