use log::trace;
use ndarray::ArrayView1;
use rayon::prelude::*;

/// Below this many candidates per task the scan stays on one thread.
const MIN_CANDIDATES_PER_TASK: usize = 256;

/// Best candidate found by [`find_best_match`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    /// Position of the candidate in the scanned slice.
    pub position: usize,
    pub similarity: f64,
}

impl BestMatch {
    /// Accepts on the half-open interval `[threshold, 1]`.
    pub fn accepted(&self, threshold: f64) -> bool {
        self.similarity >= threshold
    }
}

/// Compute cosine similarity between two descriptors
///
/// Defined as 0 when either norm is 0 or the lengths differ, so a single
/// corrupt enrollment scores as "no resemblance" instead of failing a scan.
/// Both vectors are divided by their largest component first, so the squared
/// norms stay within `[1, len]` for any finite input.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let scale_a = max_abs(a);
    let scale_b = max_abs(b);
    if scale_a == 0.0 || scale_b == 0.0 || !scale_a.is_finite() || !scale_b.is_finite() {
        return 0.0;
    }

    let a = ArrayView1::from(a).mapv(|x| x / scale_a);
    let b = ArrayView1::from(b).mapv(|x| x / scale_b);

    // sqrt(x * x) == x exactly, which keeps self-similarity at 1.0.
    let magnitude = (a.dot(&a) * b.dot(&b)).sqrt();
    let similarity = a.dot(&b) / magnitude;
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(-1.0, 1.0)
    }
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |max, x| max.max(x.abs()))
}

/// Exact linear scan for the candidate most similar to `probe`.
///
/// The scan is a partitioned reduction: each rayon task finds its local best
/// and the partial results are merged. Only positive similarities count as a
/// match. Exactly equal scores resolve to the lowest position, so the result
/// is the same as a sequential first-seen scan regardless of partitioning.
pub fn find_best_match<C>(probe: &[f64], candidates: &[C]) -> Option<BestMatch>
where
    C: AsRef<[f64]> + Sync,
{
    trace!("Scanning {} candidates", candidates.len());
    candidates
        .par_iter()
        .with_min_len(MIN_CANDIDATES_PER_TASK)
        .enumerate()
        .map(|(position, candidate)| BestMatch {
            position,
            similarity: cosine_similarity(probe, candidate.as_ref()),
        })
        .filter(|m| m.similarity > 0.0)
        .reduce_with(prefer)
}

fn prefer(current: BestMatch, other: BestMatch) -> BestMatch {
    let better = other.similarity > current.similarity
        || (other.similarity == current.similarity && other.position < current.position);
    if better {
        other
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]), -1.0);
    }

    #[test]
    fn zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn self_similarity_is_one() {
        for v in [vec![2.0, 0.0], vec![0.3, -1.7, 2.2], vec![1e-3; 128]] {
            assert_eq!(cosine_similarity(&v, &v), 1.0);
        }
    }

    #[test]
    fn extreme_magnitudes_keep_self_similarity() {
        for scale in [1e-170, 1e-300, 1e160, 1e200, 1e300] {
            let v = vec![scale; 128];
            assert_eq!(cosine_similarity(&v, &v), 1.0, "scale {scale}");
        }

        let mut mixed = vec![1e-200; 128];
        mixed[0] = 1e200;
        assert_eq!(cosine_similarity(&mixed, &mixed), 1.0);

        let tiny = vec![1e-170, -1e-170];
        let huge = vec![1e160, 1e160];
        assert_eq!(cosine_similarity(&tiny, &huge), 0.0);
        assert_eq!(cosine_similarity(&[1e-170, 0.0], &[1e160, 0.0]), 1.0);
    }

    #[test]
    fn non_finite_component_is_zero() {
        assert_eq!(cosine_similarity(&[f64::INFINITY, 1.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[f64::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn best_match_prefers_highest() {
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![1.0, 1.0]];
        let best = find_best_match(&[1.0, 0.0], &candidates).unwrap();
        assert_eq!(best.position, 1);
    }

    #[test]
    fn ties_keep_first_seen() {
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0]];
        let best = find_best_match(&[1.0, 0.0], &candidates).unwrap();
        assert_eq!(best.position, 1);
        assert_eq!(best.similarity, 1.0);
    }

    #[test]
    fn no_positive_candidate_is_none() {
        let candidates = vec![vec![-1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(find_best_match(&[1.0, 0.0], &candidates), None);
        let empty: Vec<Vec<f64>> = vec![];
        assert_eq!(find_best_match(&[1.0, 0.0], &empty), None);
    }

    #[test]
    fn acceptance_boundary_is_inclusive() {
        let m = BestMatch {
            position: 0,
            similarity: 0.6,
        };
        assert!(m.accepted(0.6));
        assert!(!m.accepted(0.6000001));
    }
}
