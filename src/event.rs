use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::storage::{AuditSink, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Register,
    Update,
    Delete,
    VerifySuccess,
    VerifyFailed,
}

impl EventAction {
    pub fn is_verification(self) -> bool {
        matches!(self, EventAction::VerifySuccess | EventAction::VerifyFailed)
    }
}

/// Where a request came from. Opaque to the core, passed through to the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContext {
    pub ip_address: Option<String>,
    pub device: Option<String>,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub event_id: Uuid,
    pub identity_id: Option<String>,
    pub action: EventAction,
    pub similarity: Option<f64>,
    pub liveness_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub reason: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
    pub context: EventContext,
}

impl VerificationEvent {
    pub fn new(action: EventAction, identity_id: Option<&str>, context: EventContext) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            identity_id: identity_id.map(str::to_string),
            action,
            similarity: None,
            liveness_score: None,
            quality_score: None,
            reason: None,
            timestamp: Utc::now(),
            context,
        }
    }

    pub fn similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn liveness(mut self, score: Option<f64>) -> Self {
        self.liveness_score = score;
        self
    }

    pub fn quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn reason(mut self, reason: ErrorKind) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Best-effort writer in front of the audit sink.
///
/// A failed append never changes the outcome reported to the caller; it is
/// logged and counted instead.
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    failures: AtomicU64,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            failures: AtomicU64::new(0),
        }
    }

    pub fn record(&self, event: VerificationEvent) {
        if let Err(err) = self.sink.append(&event) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                "Audit append failed for {:?} event {}: {}",
                event.action, event.event_id, err
            );
        }
    }

    /// Appends that were dropped since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<VerificationEvent>> {
        self.sink.events_since(since)
    }
}
