use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use facegate::storage::{MemoryAuditSink, MemoryBlobStore, MemoryIdentityRepository};
use facegate::{
    Config, ErrorKind, EventAction, FaceGate, LivenessSignals, ProfileMetadata,
    VerificationRequest, VerifyOptions,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Harness {
    repo: Arc<MemoryIdentityRepository>,
    sink: Arc<MemoryAuditSink>,
    gate: FaceGate,
}

fn harness(identities: &[&str]) -> Harness {
    env_logger::try_init().ok();
    let repo = Arc::new(MemoryIdentityRepository::new());
    for id in identities {
        repo.add_identity(id, true);
    }
    let sink = Arc::new(MemoryAuditSink::new());
    let gate = FaceGate::new(
        &Config::default(),
        repo.clone(),
        Arc::new(MemoryBlobStore::new()),
        sink.clone(),
    );
    Harness { repo, sink, gate }
}

fn random_unit(rng: &mut StdRng) -> Vec<f64> {
    let v: Vec<f64> = (0..128).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    v.into_iter().map(|x| x / norm).collect()
}

fn enroll(h: &Harness, id: &str, descriptor: &[f64]) {
    h.gate
        .register(id, descriptor.to_vec(), ProfileMetadata::default(), None)
        .unwrap();
}

#[test]
fn exact_probe_matches_its_identity() {
    let h = harness(&["id1", "id2", "id3"]);
    let mut rng = StdRng::seed_from_u64(1);
    let descriptors: Vec<_> = (0..3).map(|_| random_unit(&mut rng)).collect();
    for (id, d) in ["id1", "id2", "id3"].iter().zip(&descriptors) {
        enroll(&h, id, d);
    }

    let result = h.gate.verify(
        &VerificationRequest::new(descriptors[1].clone()),
        &VerifyOptions {
            threshold: Some(0.6),
            ..VerifyOptions::default()
        },
    );
    assert!(result.accepted);
    assert_eq!(result.identity_id.as_deref(), Some("id2"));
    assert_eq!(result.similarity, 1.0);
    assert_eq!(result.reason, None);
}

#[test]
fn uncorrelated_probe_is_rejected() {
    let h = harness(&["id1", "id2", "id3"]);
    let mut rng = StdRng::seed_from_u64(2);
    for id in ["id1", "id2", "id3"] {
        enroll(&h, id, &random_unit(&mut rng));
    }

    let result = h.gate.verify(
        &VerificationRequest::new(random_unit(&mut rng)),
        &VerifyOptions::default(),
    );
    assert!(!result.accepted);
    assert_eq!(result.identity_id, None);
    assert_eq!(result.reason, Some(ErrorKind::NoMatch));
    assert!(result.similarity < 0.6);
}

#[test]
fn second_register_is_already_enrolled() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(3);
    let first = random_unit(&mut rng);
    enroll(&h, "id1", &first);

    let err = h
        .gate
        .register("id1", random_unit(&mut rng), ProfileMetadata::default(), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyEnrolled);
    assert_eq!(h.gate.profile("id1").unwrap().unwrap().descriptor, first);
}

#[test]
fn short_descriptor_never_touches_index() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(4);
    enroll(&h, "id1", &random_unit(&mut rng));

    let result = h.gate.verify(
        &VerificationRequest::new(vec![0.1; 127]),
        &VerifyOptions::default(),
    );
    assert!(!result.accepted);
    assert_eq!(result.reason, Some(ErrorKind::InvalidDescriptor));
    assert_eq!(h.repo.load_count(), 0);
}

#[test]
fn update_is_visible_to_next_verify() {
    let h = harness(&["id1", "id2"]);
    let mut rng = StdRng::seed_from_u64(5);
    let old = random_unit(&mut rng);
    enroll(&h, "id1", &old);
    enroll(&h, "id2", &random_unit(&mut rng));

    // Warm the index on the old descriptor.
    assert!(h
        .gate
        .verify(&VerificationRequest::new(old.clone()), &VerifyOptions::default())
        .accepted);

    let new = random_unit(&mut rng);
    h.gate
        .update("id1", new.clone(), ProfileMetadata::default(), None)
        .unwrap();

    let result = h
        .gate
        .verify(&VerificationRequest::new(new), &VerifyOptions::default());
    assert!(result.accepted);
    assert_eq!(result.identity_id.as_deref(), Some("id1"));
    assert_eq!(result.similarity, 1.0);

    let stale = h
        .gate
        .verify(&VerificationRequest::new(old), &VerifyOptions::default());
    assert!(!stale.accepted);
}

#[test]
fn delete_is_visible_to_next_verify() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(6);
    let d = random_unit(&mut rng);
    enroll(&h, "id1", &d);
    assert!(h
        .gate
        .verify(&VerificationRequest::new(d.clone()), &VerifyOptions::default())
        .accepted);

    h.gate.delete("id1").unwrap();
    let result = h
        .gate
        .verify(&VerificationRequest::new(d), &VerifyOptions::default());
    assert!(!result.accepted);
    assert_eq!(result.similarity, 0.0);
}

#[test]
fn mutations_are_observed_under_concurrent_readers() {
    let h = harness(&["id1", "id2"]);
    let mut rng = StdRng::seed_from_u64(7);
    let bystander = random_unit(&mut rng);
    enroll(&h, "id2", &bystander);
    let mut current = random_unit(&mut rng);
    enroll(&h, "id1", &current);

    let stop = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    let result = h.gate.verify(
                        &VerificationRequest::new(bystander.clone()),
                        &VerifyOptions::default(),
                    );
                    assert_eq!(result.identity_id.as_deref(), Some("id2"));
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        for _ in 0..20 {
            let next = random_unit(&mut rng);
            h.gate
                .update("id1", next.clone(), ProfileMetadata::default(), None)
                .unwrap();

            let fresh = h
                .gate
                .verify(&VerificationRequest::new(next.clone()), &VerifyOptions::default());
            assert!(fresh.accepted);
            assert_eq!(fresh.identity_id.as_deref(), Some("id1"));
            assert_eq!(fresh.similarity, 1.0);

            let stale = h
                .gate
                .verify(&VerificationRequest::new(current), &VerifyOptions::default());
            assert_ne!(stale.identity_id.as_deref(), Some("id1"));
            current = next;
        }
        stop.store(true, Ordering::Relaxed);
    });
    assert!(reads.load(Ordering::Relaxed) > 0);
}

#[test]
fn every_attempt_is_audited_once() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(8);
    let d = random_unit(&mut rng);
    enroll(&h, "id1", &d);

    h.gate
        .verify(&VerificationRequest::new(d.clone()), &VerifyOptions::default());
    h.gate.verify(
        &VerificationRequest::new(vec![0.0; 3]),
        &VerifyOptions::default(),
    );
    h.gate.verify(
        &VerificationRequest {
            liveness: LivenessSignals {
                blink_detected: Some(false),
                head_movement: Some(0.0),
                ..LivenessSignals::default()
            },
            ..VerificationRequest::new(d)
        },
        &VerifyOptions::default(),
    );

    let actions: Vec<_> = h.sink.events().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            EventAction::Register,
            EventAction::VerifySuccess,
            EventAction::VerifyFailed,
            EventAction::VerifyFailed,
        ]
    );
    assert_eq!(h.sink.events()[3].reason, Some(ErrorKind::LivenessFailed));
}

#[test]
fn audit_outage_is_counted_not_reported() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(9);
    let d = random_unit(&mut rng);
    enroll(&h, "id1", &d);

    h.sink.fail_appends(true);
    let result = h
        .gate
        .verify(&VerificationRequest::new(d), &VerifyOptions::default());
    assert!(result.accepted);
    assert_eq!(h.gate.audit_failures(), 1);
}

#[test]
fn repository_outage_serves_last_snapshot() {
    let h = harness(&["id1"]);
    let mut rng = StdRng::seed_from_u64(10);
    let d = random_unit(&mut rng);
    enroll(&h, "id1", &d);
    assert!(h
        .gate
        .verify(&VerificationRequest::new(d.clone()), &VerifyOptions::default())
        .accepted);

    h.repo.fail_loads(true);
    h.gate.invalidate_index();
    let result = h
        .gate
        .verify(&VerificationRequest::new(d), &VerifyOptions::default());
    assert!(result.accepted);
}

#[test]
fn cold_start_without_repository_is_index_unavailable() {
    let h = harness(&["id1"]);
    h.repo.fail_loads(true);
    let mut rng = StdRng::seed_from_u64(11);
    let result = h.gate.verify(
        &VerificationRequest::new(random_unit(&mut rng)),
        &VerifyOptions::default(),
    );
    assert_eq!(result.reason, Some(ErrorKind::IndexUnavailable));
    assert!(h.gate.batch_verify(&[random_unit(&mut rng)], 0.6).is_err());
}

#[test]
fn statistics_fold_the_audit_log() {
    let h = harness(&["id1", "id2", "id3", "id4"]);
    let mut rng = StdRng::seed_from_u64(12);
    let d1 = random_unit(&mut rng);
    enroll(&h, "id1", &d1);
    enroll(&h, "id2", &random_unit(&mut rng));

    for _ in 0..3 {
        h.gate
            .verify(&VerificationRequest::new(d1.clone()), &VerifyOptions::default());
    }
    h.gate.verify(
        &VerificationRequest::new(random_unit(&mut rng)),
        &VerifyOptions::default(),
    );

    let stats = h.gate.statistics().unwrap();
    assert_eq!(stats.enrolled_count, 2);
    assert_eq!(stats.population, 4);
    assert_eq!(stats.registration_rate, 50.0);
    assert_eq!(stats.total_verifications, 4);
    assert_eq!(stats.successful_verifications, 3);
    assert_eq!(stats.recent_accuracy, 75.0);
    assert_eq!(stats.algorithms_used["face-api.js"], 2);
    assert_eq!(stats.quality_distribution.poor, 2);

    let id1 = h.gate.identity_statistics("id1").unwrap();
    assert_eq!(id1.verification_count, 3);
    assert_eq!(id1.average_similarity, 1.0);
    assert!(id1.last_verified.is_some());
}

#[test]
fn batch_uses_one_snapshot() {
    let h = harness(&["id1", "id2"]);
    let mut rng = StdRng::seed_from_u64(13);
    let d1 = random_unit(&mut rng);
    let d2 = random_unit(&mut rng);
    enroll(&h, "id1", &d1);
    enroll(&h, "id2", &d2);

    let probes = vec![d2, random_unit(&mut rng), d1, vec![1.0; 64]];
    let outcomes = h.gate.batch_verify(&probes, h.gate.default_threshold()).unwrap();
    let matched: Vec<_> = outcomes.iter().map(|o| o.identity_id.as_deref()).collect();
    assert_eq!(matched, vec![Some("id2"), None, Some("id1"), None]);
    assert!(outcomes[3].error.is_some());
    assert_eq!(h.repo.load_count(), 1);
}

#[test]
fn slow_repository_does_not_block_past_timeout() {
    let repo = Arc::new(MemoryIdentityRepository::new());
    repo.add_identity("id1", true);
    let mut cfg = Config::default();
    cfg.index.rebuild_timeout_ms = 50;
    let gate = FaceGate::new(
        &cfg,
        repo.clone(),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryAuditSink::new()),
    );
    let mut rng = StdRng::seed_from_u64(14);
    let d = random_unit(&mut rng);
    gate.register("id1", d.clone(), ProfileMetadata::default(), None)
        .unwrap();
    assert!(gate
        .verify(&VerificationRequest::new(d.clone()), &VerifyOptions::default())
        .accepted);

    repo.set_load_delay(Duration::from_millis(500));
    gate.invalidate_index();
    let started = std::time::Instant::now();
    let result = gate.verify(&VerificationRequest::new(d), &VerifyOptions::default());
    assert!(result.accepted);
    assert!(started.elapsed() < Duration::from_millis(400));
}
