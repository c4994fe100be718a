use facegate_match::{cosine_similarity, find_best_match, DescriptorRules};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_descriptor(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn similarity_is_symmetric() {
    env_logger::try_init().ok();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let a = random_descriptor(&mut rng, 128);
        let b = random_descriptor(&mut rng, 128);
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }
}

#[test]
fn self_similarity_is_maximal() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let d = random_descriptor(&mut rng, 128);
        assert_eq!(cosine_similarity(&d, &d), 1.0);
        let other = random_descriptor(&mut rng, 128);
        assert!(cosine_similarity(&d, &other) <= 1.0);
    }
}

#[test]
fn parallel_scan_matches_sequential_first_seen() {
    let mut rng = StdRng::seed_from_u64(3);
    let target = random_descriptor(&mut rng, 128);

    let mut population: Vec<Vec<f64>> = (0..4000)
        .map(|_| random_descriptor(&mut rng, 128))
        .collect();
    // Exact duplicates of the target spread across partitions.
    for position in [1500, 2600, 3999] {
        population[position] = target.clone();
    }

    let best = find_best_match(&target, &population).expect("match");
    assert_eq!(best.position, 1500);
    assert_eq!(best.similarity, 1.0);

    let sequential = population
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(&target, c)))
        .fold(None::<(usize, f64)>, |acc, (i, s)| match acc {
            Some((_, best)) if best >= s => acc,
            _ if s > 0.0 => Some((i, s)),
            _ => acc,
        });
    assert_eq!(sequential, Some((1500, 1.0)));
}

#[test]
fn corrupt_candidate_does_not_abort_scan() {
    let rules = DescriptorRules::default();
    let mut rng = StdRng::seed_from_u64(5);
    let probe = random_descriptor(&mut rng, 128);
    assert!(rules.validate_shape(&probe).is_ok());

    let population = vec![vec![0.5; 64], probe.clone(), vec![]];
    let best = find_best_match(&probe, &population).expect("match");
    assert_eq!(best.position, 1);
}

#[test]
fn uncorrelated_probe_stays_below_default_threshold() {
    let mut rng = StdRng::seed_from_u64(19);
    let population: Vec<Vec<f64>> = (0..3).map(|_| random_descriptor(&mut rng, 128)).collect();
    let probe = random_descriptor(&mut rng, 128);
    if let Some(best) = find_best_match(&probe, &population) {
        assert!(!best.accepted(0.6));
    }
}

#[test]
fn extreme_scale_enrollment_still_matches_itself() {
    let rules = DescriptorRules::default();
    let mut rng = StdRng::seed_from_u64(23);
    let population: Vec<Vec<f64>> = [1e-170, 1.0, 1e160]
        .iter()
        .map(|scale| {
            random_descriptor(&mut rng, 128)
                .into_iter()
                .map(|x| x * scale)
                .collect()
        })
        .collect();

    for (position, descriptor) in population.iter().enumerate() {
        assert!(rules.validate_shape(descriptor).is_ok());
        let best = find_best_match(descriptor, &population).expect("match");
        assert_eq!(best.position, position);
        assert_eq!(best.similarity, 1.0);
    }
}
