//! Periodic progress lines for long-running dumps
//!
//! Progress is measured in remote feature positions: a resumed dump starts
//! counting at its resume offset, so percentages stay comparable across runs.
//! Updates are emitted on every 10% step of a known total, or once a minute
//! otherwise.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_DUMP_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Progress tracking state for one dump attempt
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Position the attempt started at
    pub initial: u64,
    /// Position of the next feature (initial + features seen)
    pub position: u64,
    /// Total features in the layer (if known)
    pub total: Option<u64>,
    /// Chunk currently being written
    pub chunk_index: u64,
    /// Timestamp when the attempt started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Last reported percentage (0-100)
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Track an attempt starting at `initial` out of `total`
    pub fn new(initial: u64, total: Option<u64>, chunk_index: u64) -> Self {
        let now = Instant::now();
        let mut state = Self {
            initial,
            position: initial,
            total,
            chunk_index,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        };
        state.last_reported_percentage = state.percentage().unwrap_or(0.0);
        state
    }

    /// Override the time-based update interval
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Record one feature written into `chunk_index`
    pub fn record(&mut self, chunk_index: u64) {
        self.position += 1;
        self.chunk_index = chunk_index;
    }

    /// Features seen during this attempt
    pub fn features_this_attempt(&self) -> u64 {
        self.position - self.initial
    }

    /// Features per second during this attempt
    pub fn rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.features_this_attempt() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Whether a progress update should be emitted based on time or percentage
    pub fn should_emit_update(&self) -> bool {
        if self.features_this_attempt() == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_DUMP_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100), when the total is known
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.position.min(total) as f64 / total as f64) * 100.0)
    }

    /// Estimated time left, from the current rate and a known total
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let rate = self.rate();
        let remaining = self.total?.saturating_sub(self.position);
        if rate > 0.0 && remaining > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        }
    }

    /// Human-readable progress string for logging
    pub fn format_progress(&self) -> String {
        let mut parts = vec![match self.total {
            Some(total) => format!("[PROGRESS] {}/{} features", self.position, total),
            None => format!("[PROGRESS] {} features", self.position),
        }];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        parts.push(format!("(chunk {})", self.chunk_index));

        let rate = self.rate();
        if rate > 0.0 {
            parts.push(format!("at {rate:.0} features/sec"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
