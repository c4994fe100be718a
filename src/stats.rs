//! Adoption and accuracy figures, folded from profiles and the audit log.
//!
//! Nothing here keeps counters of its own; every number can be reproduced
//! from the repository and the event log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::FaceResult;
use crate::event::{AuditTrail, EventAction, VerificationEvent};
use crate::profile::FaceProfile;
use crate::storage::IdentityRepository;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

impl QualityDistribution {
    fn add(&mut self, quality: f64) {
        if quality > 0.9 {
            self.excellent += 1;
        } else if quality > 0.7 {
            self.good += 1;
        } else if quality > 0.5 {
            self.fair += 1;
        } else {
            self.poor += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub enrolled_count: usize,
    pub population: usize,
    /// Enrolled share of the population, in percent.
    pub registration_rate: f64,
    pub total_verifications: usize,
    pub successful_verifications: usize,
    /// Successful share of verifications within the window, in percent.
    pub recent_accuracy: f64,
    pub average_confidence: f64,
    pub quality_distribution: QualityDistribution,
    pub algorithms_used: BTreeMap<String, usize>,
    pub window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityStatistics {
    pub identity_id: String,
    pub verification_count: u64,
    pub average_similarity: f64,
    pub last_verified: Option<DateTime<Utc>>,
}

impl Statistics {
    pub fn fold(
        profiles: &[FaceProfile],
        population: usize,
        events: &[VerificationEvent],
        window_days: u32,
    ) -> Self {
        let mut quality_distribution = QualityDistribution::default();
        let mut algorithms_used = BTreeMap::new();
        let mut confidence_sum = 0.0;
        for profile in profiles {
            quality_distribution.add(profile.quality_score);
            *algorithms_used
                .entry(profile.algorithm_tag.clone())
                .or_insert(0) += 1;
            confidence_sum += profile.confidence;
        }

        let (total, successful) = events
            .iter()
            .filter(|e| e.action.is_verification())
            .fold((0, 0), |(total, ok), e| {
                (total + 1, ok + usize::from(e.action == EventAction::VerifySuccess))
            });

        Self {
            enrolled_count: profiles.len(),
            population,
            registration_rate: round_to(percent(profiles.len(), population), 2),
            total_verifications: total,
            successful_verifications: successful,
            recent_accuracy: round_to(percent(successful, total), 2),
            average_confidence: if profiles.is_empty() {
                0.0
            } else {
                round_to(confidence_sum / profiles.len() as f64, 3)
            },
            quality_distribution,
            algorithms_used,
            window_days,
        }
    }
}

impl IdentityStatistics {
    /// Count, running mean similarity and last success for one identity.
    pub fn fold(identity_id: &str, events: &[VerificationEvent]) -> Self {
        let mut stats = Self {
            identity_id: identity_id.to_string(),
            verification_count: 0,
            average_similarity: 0.0,
            last_verified: None,
        };
        let successes = events.iter().filter(|e| {
            e.action == EventAction::VerifySuccess && e.identity_id.as_deref() == Some(identity_id)
        });
        for event in successes {
            stats.verification_count += 1;
            let similarity = event.similarity.unwrap_or(0.0);
            stats.average_similarity +=
                (similarity - stats.average_similarity) / stats.verification_count as f64;
            stats.last_verified = stats.last_verified.max(Some(event.timestamp));
        }
        stats
    }
}

pub struct StatisticsAggregator {
    repository: Arc<dyn IdentityRepository>,
    audit: Arc<AuditTrail>,
    window_days: u32,
}

impl StatisticsAggregator {
    pub fn new(
        repository: Arc<dyn IdentityRepository>,
        audit: Arc<AuditTrail>,
        window_days: u32,
    ) -> Self {
        Self {
            repository,
            audit,
            window_days,
        }
    }

    pub fn statistics(&self) -> FaceResult<Statistics> {
        let since = Utc::now()
            .checked_sub_signed(Duration::days(i64::from(self.window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let profiles = self.repository.load_all()?;
        let population = self.repository.population()?;
        let events = self.audit.events_since(since)?;
        Ok(Statistics::fold(
            &profiles,
            population,
            &events,
            self.window_days,
        ))
    }

    /// Lifetime figures for one identity.
    pub fn identity(&self, identity_id: &str) -> FaceResult<IdentityStatistics> {
        let events = self.audit.events_since(DateTime::<Utc>::MIN_UTC)?;
        Ok(IdentityStatistics::fold(identity_id, &events))
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
