//! In-memory snapshot of every enrolled descriptor.
//!
//! The snapshot is derived data: the identity repository stays authoritative.
//! A generation counter is the invalidation token. Every committed enrollment
//! mutation bumps it, and a snapshot is only served as fresh while its
//! generation matches and it is younger than the TTL.
//!
//! Readers share an `Arc<IndexSnapshot>` and never block each other. At most
//! one rebuild runs at a time, on a background thread; readers wait for it up
//! to the rebuild timeout and then fall back to the last good snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use facegate_match::{find_best_match, BestMatch};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{FaceError, FaceResult};
use crate::storage::IdentityRepository;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub identity_id: String,
    pub descriptor: Vec<f64>,
    pub algorithm_tag: String,
}

impl AsRef<[f64]> for IndexEntry {
    fn as_ref(&self) -> &[f64] {
        &self.descriptor
    }
}

/// Best enrolled identity for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub identity_id: String,
    pub similarity: f64,
}

#[derive(Debug)]
pub struct IndexSnapshot {
    entries: Vec<IndexEntry>,
    generation: u64,
    built_at: Instant,
}

impl IndexSnapshot {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of entries per descriptor algorithm.
    pub fn algorithm_tags(&self) -> BTreeMap<&str, usize> {
        let mut tags = BTreeMap::new();
        for entry in &self.entries {
            *tags.entry(entry.algorithm_tag.as_str()).or_insert(0) += 1;
        }
        tags
    }

    /// Exact scan; ties resolve to the entry inserted first.
    pub fn best_match(&self, probe: &[f64]) -> Option<IndexMatch> {
        find_best_match(probe, &self.entries).map(|BestMatch { position, similarity }| {
            IndexMatch {
                identity_id: self.entries[position].identity_id.clone(),
                similarity,
            }
        })
    }
}

#[derive(Debug, Default)]
struct RebuildState {
    in_flight: bool,
    last_failed: bool,
}

struct Shared {
    repository: Arc<dyn IdentityRepository>,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    generation: AtomicU64,
    rebuild: Mutex<RebuildState>,
    rebuilt: Condvar,
    ttl: Duration,
}

impl Shared {
    fn fresh(&self) -> Option<Arc<IndexSnapshot>> {
        let generation = self.generation.load(Ordering::Acquire);
        let current = self.current.read();
        current
            .as_ref()
            .filter(|s| s.generation == generation && s.built_at.elapsed() < self.ttl)
            .cloned()
    }

    fn current_generation(&self) -> Option<Arc<IndexSnapshot>> {
        let generation = self.generation.load(Ordering::Acquire);
        let current = self.current.read();
        current
            .as_ref()
            .filter(|s| s.generation == generation)
            .cloned()
    }

    fn last_good(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.read().clone()
    }

    fn build(&self, generation: u64) -> FaceResult<IndexSnapshot> {
        let started = Instant::now();
        let entries: Vec<IndexEntry> = self
            .repository
            .load_all()?
            .into_iter()
            .map(|p| IndexEntry {
                identity_id: p.identity_id,
                descriptor: p.descriptor,
                algorithm_tag: p.algorithm_tag,
            })
            .collect();
        debug!(
            "Rebuilt enrolled index: {} identities in {:?} (generation {})",
            entries.len(),
            started.elapsed(),
            generation
        );
        let snapshot = IndexSnapshot {
            entries,
            generation,
            built_at: Instant::now(),
        };
        let tags = snapshot.algorithm_tags();
        if tags.len() > 1 {
            // Descriptors from different models do not share a space.
            debug!("Enrolled index mixes descriptor algorithms: {:?}", tags);
        }
        Ok(snapshot)
    }
}

/// Shared, rebuildable view over the identity repository.
#[derive(Clone)]
pub struct EnrolledIndex {
    shared: Arc<Shared>,
    rebuild_timeout: Duration,
}

impl EnrolledIndex {
    pub fn new(
        repository: Arc<dyn IdentityRepository>,
        ttl: Duration,
        rebuild_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                repository,
                current: RwLock::new(None),
                generation: AtomicU64::new(0),
                rebuild: Mutex::new(RebuildState::default()),
                rebuilt: Condvar::new(),
                ttl,
            }),
            rebuild_timeout,
        }
    }

    /// Mark the current snapshot stale. The next reader rebuilds.
    pub fn invalidate(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Enrolled index invalidated (generation {})", generation);
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Current snapshot, rebuilding it first if stale.
    ///
    /// Serves the last good snapshot when the rebuild fails or outlasts the
    /// timeout. Fails with `IndexUnavailable` only when no snapshot was ever
    /// built.
    pub fn snapshot(&self) -> FaceResult<Arc<IndexSnapshot>> {
        if let Some(snapshot) = self.shared.fresh() {
            return Ok(snapshot);
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(self.rebuild_timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86_400));
        let mut started = false;
        let mut state = self.shared.rebuild.lock();
        loop {
            if let Some(snapshot) = self.shared.fresh() {
                return Ok(snapshot);
            }
            if !state.in_flight {
                if started {
                    // Ours finished; take it even if the TTL is shorter than the build.
                    if let Some(snapshot) = self.shared.current_generation() {
                        return Ok(snapshot);
                    }
                    if state.last_failed {
                        break;
                    }
                }
                state.in_flight = true;
                started = true;
                if !self.spawn_rebuild() {
                    state.in_flight = false;
                    state.last_failed = true;
                    break;
                }
            }
            if self.shared.rebuilt.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let failed = state.last_failed;
        drop(state);

        match self.shared.last_good() {
            Some(stale) => {
                warn!(
                    "Serving stale enrolled index (generation {}, current {}): rebuild {}",
                    stale.generation,
                    self.generation(),
                    if failed { "failed" } else { "timed out" }
                );
                Ok(stale)
            }
            None => Err(FaceError::IndexUnavailable(if failed {
                "rebuild failed and no previous snapshot exists".to_string()
            } else {
                format!(
                    "rebuild did not finish within {:?} and no previous snapshot exists",
                    self.rebuild_timeout
                )
            })),
        }
    }

    /// Best enrolled identity for `probe` on the current snapshot.
    pub fn best_match(&self, probe: &[f64]) -> FaceResult<Option<IndexMatch>> {
        Ok(self.snapshot()?.best_match(probe))
    }

    // Caller holds the rebuild lock and has set `in_flight`.
    fn spawn_rebuild(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        let generation = shared.generation.load(Ordering::Acquire);
        let spawned = thread::Builder::new()
            .name("facegate-index-rebuild".to_string())
            .spawn(move || {
                let result = shared.build(generation);
                let mut state = shared.rebuild.lock();
                match result {
                    Ok(snapshot) => {
                        *shared.current.write() = Some(Arc::new(snapshot));
                        state.last_failed = false;
                    }
                    Err(err) => {
                        warn!("Enrolled index rebuild failed: {}", err);
                        state.last_failed = true;
                    }
                }
                state.in_flight = false;
                drop(state);
                shared.rebuilt.notify_all();
            });

        match spawned {
            Ok(_) => true,
            Err(err) => {
                warn!("Could not start index rebuild: {}", err);
                false
            }
        }
    }
}
