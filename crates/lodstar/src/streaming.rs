//! Reference loader streaming payloads from a dataset directory.
//!
//! The frame thread calls [`OctantLoader::queue`] and [`OctantLoader::touch`]
//! through the visibility traversal; both only record the request. Payloads
//! are read by [`StreamingLoader::process_queue`], either called directly or
//! from the worker thread started with [`StreamingLoader::spawn_worker`].
//!
//! # Counts
//!
//! After [`StreamingLoader::preload`] the tree's object counts describe what
//! is resident in memory, not what is stored on disk: every load adds to
//! them and every eviction subtracts from them.
//!
//! # Failures
//!
//! An octant whose payload cannot be read is left `LoadingFailed`. It is
//! accepted again only after a backoff that doubles with every failure,
//! counted in [`StreamingLoader::process_queue`] calls.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lodstar_codec::{DecodeError, ParticleRecord};

use crate::dataset;
use crate::error::{Error, Result};
use crate::id::OctantId;
use crate::loader::OctantLoader;
use crate::octant::{LoadStatus, NodeIndex, ObjectGroup, Octant};
use crate::octree::{Octree, signed};

/// Loader settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Pending requests kept at most.
    pub queue_size: usize,
    /// Octants read per [`StreamingLoader::process_queue`] call.
    pub batch_size: usize,
    /// Octants down to this depth are loaded at startup and never evicted.
    pub preload_depth: u32,
    /// Resident object count that triggers eviction.
    pub max_loaded_objects: u64,
    /// Eviction stops once the resident count drops below this share of
    /// `max_loaded_objects`.
    pub unload_ratio: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            batch_size: 5,
            preload_depth: 3,
            max_loaded_objects: 5_000_000,
            unload_ratio: 0.85,
        }
    }
}

/// Outcome of one [`StreamingLoader::process_queue`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub loaded: usize,
    pub failed: usize,
    pub evicted: usize,
}

#[derive(Debug, Default)]
struct State {
    /// Pending requests keyed by `(depth, arrival)`, shallowest first.
    queue: BTreeMap<(u32, u64), NodeIndex>,
    arrivals: u64,
    /// Last touch of each evictable loaded octant.
    recent: HashMap<NodeIndex, u64>,
    clock: u64,
    resident: u64,
    batches: u64,
    failures: HashMap<NodeIndex, Failure>,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    attempts: u32,
    retry_at: u64,
}

/// Longest wait between two attempts at a failing octant, in batches.
const MAX_RETRY_DELAY: u64 = 64;

/// [`OctantLoader`] backed by the `particles/` directory of a dataset.
#[derive(Debug)]
pub struct StreamingLoader {
    octree: Arc<Octree>,
    dir: PathBuf,
    config: StreamingConfig,
    state: Mutex<State>,
    paused: AtomicBool,
    wake_tx: async_channel::Sender<()>,
    wake_rx: async_channel::Receiver<()>,
}

impl StreamingLoader {
    /// Read the metadata of the dataset in `dir` and preload its upper levels.
    pub fn open(dir: impl Into<PathBuf>, config: StreamingConfig) -> Result<Self> {
        let dir = dir.into();
        let mut octree = dataset::read_metadata(&dir)?;
        Self::preload(&mut octree, &dir, config.preload_depth);
        Ok(Self::new(Arc::new(octree), dir, config))
    }

    /// Loader over an existing tree whose counts already describe its
    /// attached payloads.
    #[must_use]
    pub fn new(octree: Arc<Octree>, dir: impl Into<PathBuf>, config: StreamingConfig) -> Self {
        let state = State {
            resident: octree.count_objects(),
            ..State::default()
        };
        let (wake_tx, wake_rx) = async_channel::bounded(1);
        Self {
            octree,
            dir: dir.into(),
            config,
            state: Mutex::new(state),
            paused: AtomicBool::new(false),
            wake_tx,
            wake_rx,
        }
    }

    /// Synchronously load every octant down to `depth` that has a payload
    /// on disk, then rederive all counts from what is attached.
    ///
    /// An octant whose payload cannot be read is marked `LoadingFailed`.
    /// Returns the number of objects loaded.
    pub fn preload(octree: &mut Octree, dir: &Path, depth: u32) -> u64 {
        let targets: Vec<_> = octree
            .iter()
            .filter(|o| o.depth() <= depth && o.stored_objects() > 0)
            .map(|o| (o.index(), o.id()))
            .collect();

        let mut objects = 0;
        let mut failed = 0;
        for &(index, id) in &targets {
            match read_records(dir, id) {
                Ok(records) => {
                    objects += records.len() as u64;
                    octree.set_objects(index, records);
                }
                Err(e) => {
                    warn!("Failed to preload octant {id}: {e}");
                    octree[index].set_status(LoadStatus::LoadingFailed);
                    failed += 1;
                }
            }
        }
        octree.update_counts();
        info!(
            "Preloaded {objects} objects in {} octants down to depth {depth}, {failed} failed",
            targets.len() - failed
        );
        objects
    }

    #[must_use]
    pub fn octree(&self) -> &Arc<Octree> {
        &self.octree
    }

    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Number of pending requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Objects in attached payloads.
    #[must_use]
    pub fn resident_objects(&self) -> u64 {
        self.state().resident
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stop accepting requests and drop the pending ones.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.clear_queue();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Drop every pending request, returning its octant to `NotLoaded`.
    pub fn clear_queue(&self) {
        let dropped = std::mem::take(&mut self.state().queue);
        for index in dropped.into_values() {
            self.release(index);
        }
    }

    /// Load up to `batch_size` pending octants, then evict if over budget.
    pub fn process_queue(&self) -> BatchReport {
        let batch: Vec<NodeIndex> = {
            let mut state = self.state();
            state.batches += 1;
            std::iter::from_fn(|| state.queue.pop_first().map(|(_, index)| index))
                .take(self.config.batch_size.max(1))
                .collect()
        };

        let mut report = BatchReport::default();
        for index in batch {
            let Some(octant) = self.octree.get(index) else {
                continue;
            };
            if !octant.transition(LoadStatus::Queued, LoadStatus::Loading) {
                continue;
            }
            if self.load(octant) {
                report.loaded += 1;
            } else {
                octant.transition(LoadStatus::Loading, LoadStatus::LoadingFailed);
                report.failed += 1;
            }
        }
        report.evicted = self.evict();

        if report != BatchReport::default() {
            info!(
                "Loader batch: {} loaded, {} failed, {} evicted, {} resident objects",
                report.loaded,
                report.failed,
                report.evicted,
                self.resident_objects()
            );
        }
        report
    }

    fn load(&self, octant: &Octant) -> bool {
        let records = match read_records(&self.dir, octant.id()) {
            Ok(records) => records,
            Err(e) => {
                self.record_failure(octant, &e);
                return false;
            }
        };

        let count = records.len() as u64;
        octant.transition(LoadStatus::Loading, LoadStatus::Ready);
        octant.replace_payload(Some(Arc::new(ObjectGroup::new(records))));
        octant.transition(LoadStatus::Ready, LoadStatus::Loaded);
        self.octree.touch(octant.index(), signed(count));

        let mut state = self.state();
        state.resident += count;
        state.failures.remove(&octant.index());
        if octant.depth() > self.config.preload_depth {
            state.clock += 1;
            let clock = state.clock;
            state.recent.insert(octant.index(), clock);
        }
        debug!("Loaded {count} objects of octant {}", octant.id());
        true
    }

    /// Schedule the next attempt at a failing octant, warning only once.
    fn record_failure(&self, octant: &Octant, error: &Error) {
        let mut state = self.state();
        let batches = state.batches;
        let failure = state.failures.entry(octant.index()).or_insert(Failure {
            attempts: 0,
            retry_at: 0,
        });
        failure.attempts += 1;
        let delay = 1u64
            .checked_shl(failure.attempts - 1)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY));
        failure.retry_at = batches + delay;
        if failure.attempts == 1 {
            warn!("Failed to load octant {}: {error}", octant.id());
        } else {
            debug!(
                "Failed to load octant {} again ({} attempts): {error}",
                octant.id(),
                failure.attempts
            );
        }
    }

    /// Unload least recently touched octants that are not in view until the
    /// resident count is below the unload threshold.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn evict(&self) -> usize {
        let mut state = self.state();
        if state.resident < self.config.max_loaded_objects {
            return 0;
        }
        let target = (self.config.max_loaded_objects as f64 * self.config.unload_ratio) as u64;

        let mut order: Vec<(u64, NodeIndex)> =
            state.recent.iter().map(|(&index, &at)| (at, index)).collect();
        order.sort_unstable();

        let mut evicted = 0;
        for (_, index) in order {
            if state.resident < target {
                break;
            }
            let octant = &self.octree[index];
            if octant.status() != LoadStatus::Loaded {
                state.recent.remove(&index);
                continue;
            }
            if octant.view().observed {
                continue;
            }
            let Some(group) = octant.replace_payload(None) else {
                continue;
            };
            octant.transition(LoadStatus::Loaded, LoadStatus::NotLoaded);
            let count = group.len() as u64;
            self.octree.touch(index, -signed(count));
            state.resident = state.resident.saturating_sub(count);
            state.recent.remove(&index);
            evicted += 1;
            debug!("Evicted {count} objects of octant {}", octant.id());
        }
        evicted
    }

    /// Start a thread that drains the queue whenever a request arrives.
    ///
    /// The thread exits after [`StreamingLoader::shutdown`].
    pub fn spawn_worker(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let loader = Arc::clone(self);
        thread::Builder::new()
            .name("lodstar-loader".to_string())
            .spawn(move || {
                while loader.wake_rx.recv_blocking().is_ok() {
                    loop {
                        loader.process_queue();
                        if loader.pending() == 0 {
                            break;
                        }
                    }
                }
                debug!("Loader worker stopped");
            })
    }

    /// Stop the worker thread once it has finished its current batch.
    pub fn shutdown(&self) {
        self.wake_tx.close();
    }

    fn release(&self, index: NodeIndex) {
        if let Some(octant) = self.octree.get(index) {
            octant.transition(LoadStatus::Queued, LoadStatus::NotLoaded);
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OctantLoader for StreamingLoader {
    fn queue(&self, octant: &Octant) {
        if self.is_paused() {
            return;
        }
        let mut state = self.state();
        let retry_due = state
            .failures
            .get(&octant.index())
            .is_none_or(|f| state.batches >= f.retry_at);
        let accepted = octant.transition(LoadStatus::NotLoaded, LoadStatus::Queued)
            || (retry_due && octant.transition(LoadStatus::LoadingFailed, LoadStatus::Queued));
        if !accepted {
            return;
        }

        state.arrivals += 1;
        let key = (octant.depth(), state.arrivals);
        state.queue.insert(key, octant.index());
        let dropped = if state.queue.len() > self.config.queue_size {
            state.queue.pop_last().map(|(_, index)| index)
        } else {
            None
        };
        drop(state);
        if let Some(index) = dropped {
            self.release(index);
        }
        // A full channel already holds a wake-up.
        let _ = self.wake_tx.try_send(());
    }

    fn touch(&self, octant: &Octant) {
        if octant.depth() <= self.config.preload_depth {
            return;
        }
        let mut state = self.state();
        state.clock += 1;
        let clock = state.clock;
        state.recent.insert(octant.index(), clock);
    }
}

/// Read a payload that is expected to hold objects.
fn read_records(dir: &Path, id: OctantId) -> Result<Vec<ParticleRecord>> {
    let records = dataset::read_payload(dir, id)?;
    if records.is_empty() {
        return Err(Error::Decode(DecodeError::InvalidFormat {
            context: "particles",
            detail: "payload holds no objects".to_string(),
        }));
    }
    Ok(records)
}
