//! Named-operation timing statistics.
//!
//! One [`TimingRegistry`] is created by the driver and handed to every
//! worker at construction time. All capture loops record through the same
//! registry, so a single report covers the whole rig. Workers time their
//! operations exclusively through [`ScopedTimer`], which records on drop
//! and therefore also on early returns.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Accumulated statistics for one named operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingStats {
    pub count: u64,
    pub total: Duration,
    pub last: Duration,
    /// None until the first sample arrives; a genuine zero-duration sample
    /// is representable.
    pub min: Option<Duration>,
    pub max: Duration,
}

impl TimingStats {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.last = elapsed;
        if elapsed > self.max {
            self.max = elapsed;
        }
        self.min = Some(match self.min {
            Some(current) => current.min(elapsed),
            None => elapsed,
        });
    }

    /// Mean sample duration, zero before any samples.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Thread-safe store of per-operation timing statistics.
#[derive(Debug, Default)]
pub struct TimingRegistry {
    timings: Mutex<BTreeMap<String, TimingStats>>,
}

impl TimingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample for the named operation.
    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut timings = self.timings.lock().unwrap();
        match timings.get_mut(name) {
            Some(stats) => stats.record(elapsed),
            None => {
                let mut stats = TimingStats::default();
                stats.record(elapsed);
                timings.insert(name.to_string(), stats);
            }
        }
    }

    /// Copy of the current statistics table.
    pub fn snapshot(&self) -> BTreeMap<String, TimingStats> {
        self.timings.lock().unwrap().clone()
    }

    /// Clear all entries. Intended for test isolation, not steady-state use.
    pub fn reset(&self) {
        self.timings.lock().unwrap().clear();
    }

    /// Human-readable report table.
    ///
    /// Entries are consistent individually; the table is not an atomic
    /// snapshot with respect to records arriving on other entries.
    pub fn report(&self) -> String {
        let timings = self.timings.lock().unwrap();
        let mut out = String::new();
        out.push_str("=== TIMING REPORT ===\n");
        out.push_str(
            "operation                    | count |      avg |     last |      min |      max |    total\n",
        );
        out.push_str(
            "-----------------------------+-------+----------+----------+----------+----------+---------\n",
        );
        for (name, stats) in timings.iter() {
            let ms = |d: Duration| d.as_secs_f64() * 1000.0;
            let _ = writeln!(
                out,
                "{:<28} | {:>5} | {:>6.2}ms | {:>6.2}ms | {:>6.2}ms | {:>6.2}ms | {:>7.0}ms",
                truncate(name, 28),
                stats.count,
                ms(stats.average()),
                ms(stats.last),
                ms(stats.min.unwrap_or(Duration::ZERO)),
                ms(stats.max),
                ms(stats.total),
            );
        }
        out.push_str("=====================");
        out
    }
}

fn truncate(name: &str, max_len: usize) -> &str {
    match name.char_indices().nth(max_len) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Records the elapsed time of the enclosing scope into a registry.
#[must_use = "the timer records when dropped; binding it to _ drops it immediately"]
pub struct ScopedTimer<'a> {
    registry: &'a TimingRegistry,
    name: &'a str,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(registry: &'a TimingRegistry, name: &'a str) -> Self {
        Self {
            registry,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.registry.record(self.name, self.start.elapsed());
    }
}
