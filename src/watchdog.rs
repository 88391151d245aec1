// ------------------------------------------------------------
// Adaptive memory-pressure watchdog
// ------------------------------------------------------------
//
// A single background task samples the process allocation on a fixed
// interval and keeps a cached backpressure flag. Callers query the flag
// through a bounded request channel; the task answers from its cached
// state and never samples on demand.
//
// The threshold ("baseline") adapts: when allocation stays above it for a
// full evaluation window and is still growing, the baseline is raised by
// a quarter so that jobs with a legitimately large working set do not
// report pressure forever.
//

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::metrics::{incr, METRICS};

/// Time between two allocation samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Window over which sustained growth raises the baseline.
pub const EVALUATION_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Starting threshold: one gigabyte.
pub const INITIAL_BASELINE: u64 = 1 << 30;

/// Capacity of the query channel.
pub const REQUEST_CAPACITY: usize = 2;

/// Source of the current allocation, in bytes.
///
/// `None` means the platform could not report a value; the tick is skipped.
pub trait MemorySampler: Send + 'static {
    fn allocated(&mut self) -> Option<u64>;
}

/// Samples resident memory of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemorySampler for ProcessMemory {
    fn allocated(&mut self) -> Option<u64> {
        memory_stats::memory_stats().map(|s| s.physical_mem as u64)
    }
}

/// Tunables of the watchdog.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub window: Duration,
    pub baseline: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval: SAMPLE_INTERVAL,
            window: EVALUATION_WINDOW,
            baseline: INITIAL_BASELINE,
        }
    }
}

impl WatchdogSettings {
    /// Number of consecutive high samples that make up one window.
    pub fn max_samples(&self) -> usize {
        let interval = self.interval.as_millis().max(1);
        ((self.window.as_millis() / interval) as usize).max(1)
    }
}

/// What a single sample did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Normal,
    High,
    /// Above baseline for a full window while still growing; baseline raised.
    BaselineRaised { from: u64, to: u64 },
}

/// Single-writer state owned by the watchdog task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogState {
    baseline: u64,
    max_samples: usize,
    streak: usize,
    prev_alloc: u64,
    high: bool,
}

impl WatchdogState {
    pub fn new(baseline: u64, max_samples: usize) -> Self {
        Self {
            baseline,
            max_samples,
            streak: 0,
            prev_alloc: 0,
            high: false,
        }
    }

    pub fn from_settings(settings: &WatchdogSettings) -> Self {
        Self::new(settings.baseline, settings.max_samples())
    }

    /// Folds one allocation sample into the state.
    pub fn observe(&mut self, alloc: u64) -> SampleOutcome {
        let mut outcome = SampleOutcome::Normal;

        if alloc > self.baseline {
            self.high = true;
            self.streak += 1;
            outcome = SampleOutcome::High;
        } else {
            self.high = false;
            self.streak = 0;
        }

        if self.streak >= self.max_samples && alloc > self.prev_alloc {
            let from = self.baseline;
            self.baseline = from.saturating_add(from / 4);
            self.streak = 0;
            outcome = SampleOutcome::BaselineRaised {
                from,
                to: self.baseline,
            };
        }

        self.prev_alloc = alloc;
        outcome
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    #[cfg(test)]
    fn streak(&self) -> usize {
        self.streak
    }

    pub fn high_consumption(&self) -> bool {
        self.high
    }
}

/// A point query for the cached backpressure flag.
#[derive(Debug)]
struct MemRequest {
    reply: oneshot::Sender<bool>,
}

/// Handle to the background sampler.
#[derive(Debug)]
pub struct MemoryWatchdog {
    requests: mpsc::Sender<MemRequest>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryWatchdog {
    /// Spawns the watchdog with an explicit sampler and settings.
    ///
    /// The task runs until `shutdown` flips to `true` (or its sender is
    /// dropped), then answers every queued query with `false` and exits.
    pub fn spawn_with<S: MemorySampler>(
        sampler: S,
        settings: WatchdogSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let task = tokio::spawn(run(sampler, settings, shutdown, rx));

        Self {
            requests: tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the last computed backpressure flag.
    ///
    /// Fails open: if the task is gone or draining, the answer is `false`.
    pub async fn query(&self) -> bool {
        let (reply, result) = oneshot::channel();

        if self.requests.send(MemRequest { reply }).await.is_err() {
            return false;
        }

        result.await.unwrap_or(false)
    }

    /// Waits for the background task to exit. Later calls return at once.
    pub async fn join(&self) -> anyhow::Result<()> {
        let task = self.task.lock().await.take();

        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }
}

async fn run<S: MemorySampler>(
    mut sampler: S,
    settings: WatchdogSettings,
    mut shutdown: watch::Receiver<bool>,
    mut requests: mpsc::Receiver<MemRequest>,
) {
    let mut state = WatchdogState::from_settings(&settings);

    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::debug!(
        "memory watchdog started: baseline={} window={} samples",
        state.baseline(),
        settings.max_samples()
    );

    if !*shutdown.borrow_and_update() {
        loop {
            tokio::select! {
                biased;

                // Sender dropped counts as shutdown too
                _ = shutdown.changed() => break,

                Some(req) = requests.recv() => {
                    let _ = req.reply.send(state.high_consumption());
                }

                _ = ticker.tick() => {
                    let Some(alloc) = sampler.allocated() else {
                        continue;
                    };

                    match state.observe(alloc) {
                        SampleOutcome::Normal => {}
                        SampleOutcome::High => incr(&METRICS.high_memory_samples),
                        SampleOutcome::BaselineRaised { from, to } => {
                            incr(&METRICS.high_memory_samples);
                            incr(&METRICS.baseline_raises);
                            log::info!(
                                "sustained memory growth, raising baseline {} -> {} bytes",
                                from,
                                to
                            );
                        }
                    }
                }
            }
        }
    }

    // Drain: never report pressure once shutdown has begun
    requests.close();
    while let Ok(req) = requests.try_recv() {
        let _ = req.reply.send(false);
    }

    log::debug!("memory watchdog stopped");
}
