//! Image pull progress aggregation.
//!
//! The engine reports progress per layer. [`PullProgress`] folds those
//! messages into one byte count, a percentage and an exponentially smoothed
//! transfer rate, and decides when a redraw is due.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::port::PullEvent;

/// Minimum time between two redraws.
pub const REDRAW_INTERVAL: Duration = Duration::from_millis(200);
/// Weight of the newest rate sample.
pub const RATE_SMOOTHING: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default)]
struct Layer {
    current: u64,
    total: u64,
    done: bool,
}

/// Aggregated view of a pull at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub current: u64,
    pub total: u64,
    pub layers: usize,
    pub layers_done: usize,
    /// Smoothed bytes per second.
    pub rate: Option<f64>,
}

impl ProgressSnapshot {
    /// Percentage in `0.0..=100.0`; zero until any layer size is known.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Folds layer events into a single progress stream.
#[derive(Debug)]
pub struct PullProgress {
    layers: BTreeMap<String, Layer>,
    rate: Option<f64>,
    last_draw: Option<(Instant, u64)>,
    interval: Duration,
}

impl Default for PullProgress {
    fn default() -> Self {
        Self::new(REDRAW_INTERVAL)
    }
}

impl PullProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            layers: BTreeMap::new(),
            rate: None,
            last_draw: None,
            interval,
        }
    }

    /// Record one event. Returns a snapshot when a redraw is due.
    pub fn observe(&mut self, event: &PullEvent, now: Instant) -> Option<ProgressSnapshot> {
        let Some(id) = &event.layer else {
            return None;
        };
        let layer = self.layers.entry(id.clone()).or_default();
        let status = event.status.to_ascii_lowercase();

        if status.starts_with("downloading") {
            if let Some(total) = event.total.filter(|total| *total > 0) {
                layer.total = total;
            }
            if let Some(current) = event.current {
                layer.current = current;
            }
        } else if status.contains("download complete")
            || status.contains("pull complete")
            || status.contains("already exists")
        {
            layer.done = true;
            layer.current = layer.total;
        }

        let current = self.current();
        match self.last_draw {
            Some((at, _)) if now.duration_since(at) < self.interval => None,
            Some((at, bytes)) => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    let sample = current.saturating_sub(bytes) as f64 / elapsed;
                    self.rate = Some(match self.rate {
                        Some(rate) => RATE_SMOOTHING * sample + (1.0 - RATE_SMOOTHING) * rate,
                        None => sample,
                    });
                }
                self.last_draw = Some((now, current));
                Some(self.snapshot())
            }
            None => {
                self.last_draw = Some((now, current));
                Some(self.snapshot())
            }
        }
    }

    fn current(&self) -> u64 {
        self.layers.values().map(|layer| layer.current).sum()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current: self.current(),
            total: self.layers.values().map(|layer| layer.total).sum(),
            layers: self.layers.len(),
            layers_done: self.layers.values().filter(|layer| layer.done).count(),
            rate: self.rate,
        }
    }
}

/// Receives aggregated progress for display.
pub trait PullReporter: Send {
    fn update(&mut self, image: &str, snapshot: &ProgressSnapshot);
    fn finish(&mut self, image: &str, result: Result<(), &str>);
}

/// Discards progress.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl PullReporter for SilentReporter {
    fn update(&mut self, _image: &str, _snapshot: &ProgressSnapshot) {}
    fn finish(&mut self, _image: &str, _result: Result<(), &str>) {}
}

/// Human-readable byte count, binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
