pub mod config;
pub mod constraints;
pub mod enrollment;
pub mod error;
pub mod event;
pub mod index;
pub mod profile;
pub mod stats;
pub mod storage;
pub mod verify;

use std::sync::Arc;

// Re-export matching types for convenience
pub use facegate_match::{
    cosine_similarity, DescriptorRules, LivenessPolicy, LivenessSignals, QualitySignals,
    QualityWeights,
};

pub use config::Config;
pub use error::{ErrorKind, FaceError, FaceResult, StoreError};
pub use event::{EventAction, EventContext, VerificationEvent};
pub use profile::{Evidence, EvidenceRef, FaceProfile, ProfileMetadata};
pub use stats::{IdentityStatistics, Statistics};
pub use verify::{BatchOutcome, VerificationRequest, VerificationResult, VerifyOptions};

use enrollment::EnrollmentManager;
use event::AuditTrail;
use index::EnrolledIndex;
use stats::StatisticsAggregator;
use storage::{AuditSink, BlobStore, FsBlobStore, FsIdentityRepository, IdentityRepository, JsonlAuditLog};
use verify::{VerifySettings, Verifier};

/// Verification core wired to its three collaborators.
pub struct FaceGate {
    index: EnrolledIndex,
    verifier: Verifier,
    enrollment: EnrollmentManager,
    stats: StatisticsAggregator,
    audit: Arc<AuditTrail>,
}

impl FaceGate {
    pub fn new(
        cfg: &Config,
        repository: Arc<dyn IdentityRepository>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let audit = Arc::new(AuditTrail::new(audit));
        let rules = cfg.matching.descriptor_rules();
        let index = EnrolledIndex::new(
            repository.clone(),
            cfg.index.ttl(),
            cfg.index.rebuild_timeout(),
        );

        let verifier = Verifier::new(
            index.clone(),
            repository.clone(),
            audit.clone(),
            VerifySettings {
                rules,
                liveness: cfg.liveness,
                quality: cfg.quality,
                threshold: cfg.matching.similarity_threshold,
                require_liveness: cfg.matching.require_liveness,
            },
        );
        let enrollment = EnrollmentManager::new(
            repository.clone(),
            blobs,
            index.clone(),
            audit.clone(),
            rules,
            cfg.quality,
        );
        let stats = StatisticsAggregator::new(repository, audit.clone(), cfg.stats.window_days);

        Self {
            index,
            verifier,
            enrollment,
            stats,
            audit,
        }
    }

    /// File-backed instance rooted at `cfg.store_dir`.
    pub fn open(cfg: &Config) -> Self {
        let repository = Arc::new(FsIdentityRepository::new(&cfg.store_dir));
        Self::with_fs_repository(cfg, repository)
    }

    /// File-backed instance sharing an already opened repository.
    pub fn with_fs_repository(cfg: &Config, repository: Arc<FsIdentityRepository>) -> Self {
        let root = repository.root().to_path_buf();
        Self::new(
            cfg,
            repository,
            Arc::new(FsBlobStore::in_store(&root)),
            Arc::new(JsonlAuditLog::in_store(&root)),
        )
    }

    pub fn verify(&self, request: &VerificationRequest, options: &VerifyOptions) -> VerificationResult {
        self.verifier.verify(request, options)
    }

    pub fn batch_verify(&self, probes: &[Vec<f64>], threshold: f64) -> FaceResult<Vec<BatchOutcome>> {
        self.verifier.batch_verify(probes, threshold)
    }

    pub fn register(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        self.enrollment
            .register(identity_id, descriptor, metadata, evidence)
    }

    pub fn update(
        &self,
        identity_id: &str,
        descriptor: Vec<f64>,
        metadata: ProfileMetadata,
        evidence: Option<&Evidence>,
    ) -> FaceResult<FaceProfile> {
        self.enrollment
            .update(identity_id, descriptor, metadata, evidence)
    }

    pub fn delete(&self, identity_id: &str) -> FaceResult<()> {
        self.enrollment.delete(identity_id)
    }

    pub fn profile(&self, identity_id: &str) -> FaceResult<Option<FaceProfile>> {
        self.enrollment.profile(identity_id)
    }

    pub fn evidence(&self, identity_id: &str) -> FaceResult<Option<Vec<u8>>> {
        self.enrollment.evidence(identity_id)
    }

    pub fn statistics(&self) -> FaceResult<Statistics> {
        self.stats.statistics()
    }

    pub fn identity_statistics(&self, identity_id: &str) -> FaceResult<IdentityStatistics> {
        self.stats.identity(identity_id)
    }

    /// Force the next verification to rebuild from the repository, e.g. after
    /// the repository was changed behind this instance's back.
    pub fn invalidate_index(&self) {
        self.index.invalidate();
    }

    /// Audit appends dropped since this instance started.
    pub fn audit_failures(&self) -> u64 {
        self.audit.failures()
    }

    pub fn default_threshold(&self) -> f64 {
        self.verifier.settings().threshold
    }
}
