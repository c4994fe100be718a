//! Collaborators the core reads from and writes to.
//!
//! The identity repository is authoritative for enrolled profiles; everything
//! the core keeps in memory is derived from it.

use chrono::{DateTime, Utc};

use crate::constraints::IdentityConstraints;
use crate::error::StoreError;
use crate::event::VerificationEvent;
use crate::profile::{Evidence, EvidenceRef, FaceProfile};

pub mod fs;
pub mod memory;

pub use fs::{FsBlobStore, FsIdentityRepository, JsonlAuditLog};
pub use memory::{MemoryAuditSink, MemoryBlobStore, MemoryIdentityRepository};

pub type StoreResult<T> = Result<T, StoreError>;

pub trait IdentityRepository: Send + Sync {
    /// Every enrolled profile, in a stable order.
    fn load_all(&self) -> StoreResult<Vec<FaceProfile>>;
    fn load_one(&self, identity_id: &str) -> StoreResult<Option<FaceProfile>>;
    fn is_active(&self, identity_id: &str) -> StoreResult<bool>;
    /// Number of identities eligible for enrollment, enrolled or not.
    fn population(&self) -> StoreResult<usize>;
    fn constraints(&self, identity_id: &str) -> StoreResult<IdentityConstraints>;
    fn save(&self, profile: &FaceProfile) -> StoreResult<()>;
    fn remove(&self, identity_id: &str) -> StoreResult<()>;
    /// Keep a recoverable copy of a profile about to be overwritten or removed.
    fn backup(&self, profile: &FaceProfile) -> StoreResult<()>;
}

pub trait AuditSink: Send + Sync {
    fn append(&self, event: &VerificationEvent) -> StoreResult<()>;
    fn events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<VerificationEvent>>;
}

pub trait BlobStore: Send + Sync {
    fn put(&self, owner: &str, evidence: &Evidence) -> StoreResult<EvidenceRef>;
    fn get(&self, reference: &EvidenceRef) -> StoreResult<Vec<u8>>;
    fn delete(&self, reference: &EvidenceRef) -> StoreResult<()>;
}
