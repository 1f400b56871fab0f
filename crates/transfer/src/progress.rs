//! Aggregated, rate-limited transfer progress.
//!
//! Workers report raw byte deltas; subscribers receive periodic
//! [`ProgressSnapshot`]s instead of a flood of per-chunk events. Purely
//! observational: nothing here affects transfer correctness.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use granary_protocol::{FileProgress, ProgressSnapshot, TransferStatus};

/// Callback invoked with aggregate progress.
pub type ProgressCallback = Box<dyn Fn(ProgressSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
struct FileCounter {
    total: u64,
    transferred: u64,
    status: TransferStatus,
    error: Option<String>,
}

/// Collects byte-delta events per file and notifies subscribers on a
/// fixed interval.
///
/// Finished files get one final notification carrying their terminal
/// status (and error, for failures) and are then dropped from the map,
/// so a long-lived scheduler does not accumulate entries.
pub struct ProgressReporter {
    inner: Arc<RwLock<ReporterInner>>,
    speed: Arc<SpeedCalculator>,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

struct ReporterInner {
    files: HashMap<String, FileCounter>,
    callbacks: Vec<ProgressCallback>,
}

fn build_snapshot(inner: &ReporterInner, speed: &SpeedCalculator) -> ProgressSnapshot {
    let mut files: Vec<FileProgress> = inner
        .files
        .iter()
        .map(|(handle_id, c)| FileProgress {
            handle_id: handle_id.clone(),
            total_bytes: c.total,
            transferred_bytes: c.transferred,
            status: c.status,
            error: c.error.clone(),
        })
        .collect();
    files.sort_by(|a, b| a.handle_id.cmp(&b.handle_id));

    let total_bytes: u64 = files.iter().map(|f| f.total_bytes).sum();
    let transferred_bytes: u64 = files.iter().map(|f| f.transferred_bytes).sum();

    ProgressSnapshot {
        files,
        total_bytes,
        transferred_bytes,
        bytes_per_second: speed.bytes_per_second(),
        eta: speed.eta(total_bytes.saturating_sub(transferred_bytes)),
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ReporterInner {
                files: HashMap::new(),
                callbacks: Vec::new(),
            })),
            speed: Arc::new(SpeedCalculator::default()),
            stop: Mutex::new(None),
        }
    }

    /// Registers a subscriber for periodic snapshots.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap();
        inner.callbacks.push(callback);
    }

    /// Begins tracking a file. Registering the same handle again resets
    /// its counters (a resubmitted transfer).
    pub fn register(&self, handle_id: &str, total_bytes: u64, already_transferred: u64) {
        let mut inner = self.inner.write().unwrap();
        inner.files.insert(
            handle_id.to_string(),
            FileCounter {
                total: total_bytes,
                transferred: already_transferred,
                status: TransferStatus::InProgress,
                error: None,
            },
        );
    }

    /// Stops tracking a file.
    pub fn unregister(&self, handle_id: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.files.remove(handle_id);
    }

    /// Records `delta` bytes transferred for a file. Unknown handles are
    /// ignored rather than being an error.
    pub fn report(&self, handle_id: &str, delta: u64) {
        {
            let mut inner = self.inner.write().unwrap();
            if let Some(counter) = inner.files.get_mut(handle_id) {
                counter.transferred = counter.transferred.saturating_add(delta);
            }
        }
        self.speed.add_sample(delta);
    }

    /// Records a file's terminal outcome, pushes one last snapshot to
    /// every subscriber, and stops tracking the file.
    pub fn complete(&self, handle_id: &str, status: TransferStatus, error: Option<String>) {
        {
            let mut inner = self.inner.write().unwrap();
            let Some(counter) = inner.files.get_mut(handle_id) else {
                return;
            };
            if status == TransferStatus::Completed {
                counter.transferred = counter.total;
            }
            counter.status = status;
            counter.error = error;
        }
        self.notify();
        self.unregister(handle_id);
    }

    /// Builds a point-in-time aggregate snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read().unwrap();
        build_snapshot(&inner, &self.speed)
    }

    /// Sends one snapshot to every subscriber immediately.
    pub fn notify(&self) {
        let inner = self.inner.read().unwrap();
        let snapshot = build_snapshot(&inner, &self.speed);
        for cb in &inner.callbacks {
            cb(snapshot.clone());
        }
    }

    /// Starts periodic snapshot notifications in a background tokio
    /// task. Call [`stop`](Self::stop) to cancel.
    pub fn start(&self, interval: Duration) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap();
            // Stop any existing task.
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        let speed = Arc::clone(&self.speed);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let i = inner.read().unwrap();
                        if i.files.is_empty() || i.callbacks.is_empty() {
                            continue;
                        }
                        let snapshot = build_snapshot(&i, &speed);
                        for cb in &i.callbacks {
                            cb(snapshot.clone());
                        }
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Sliding-window throughput over recent byte-delta samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    window: Duration,
    max_samples: usize,
    samples: VecDeque<(Instant, u64)>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                window,
                max_samples,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant, evicting
    /// samples that fell out of the window or exceed the memory bound.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push_back((now, bytes));
        loop {
            let expired = match s.samples.front() {
                Some((t, _)) => now.duration_since(*t) > s.window,
                None => break,
            };
            if expired || s.samples.len() > s.max_samples {
                s.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average speed in bytes/second across the retained samples, or
    /// 0.0 when there is not yet a measurable interval.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        let (Some((first, _)), Some((last, _))) = (s.samples.front(), s.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = s.samples.iter().map(|(_, bytes)| bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`, or `None` if speed
    /// is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
