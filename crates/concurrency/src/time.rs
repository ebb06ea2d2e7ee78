//! Time sources
//!
//! A transaction draws two timestamps: the start time (its snapshot
//! watermark) and the commit time (the `t_valid` of every version it
//! installs). Snapshot isolation needs a transaction that starts after
//! another commits to see a larger timestamp, so every source here is
//! strictly increasing for its callers.
//!
//! - [`LocalTimeSource`]: wall-clock microseconds, bumped on ties
//! - [`CounterTimeSource`]: 1, 2, 3, ... for deterministic tests
//! - [`HybridTimeSource`]: physical milliseconds scaled by a logical counter
//! - [`GlobalTimeSource`]: shared HTTP oracle, for multi-process deployments

use chrono::Utc;
use concord_core::{Error, Result, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Source of transaction timestamps
pub trait TimeSource: Send + Sync {
    /// Return a timestamp larger than any previously returned by this source
    fn now(&self) -> Result<Timestamp>;
}

// ===== Local =====

/// Wall-clock time in microseconds, strictly increasing within the process
#[derive(Debug, Default)]
pub struct LocalTimeSource {
    last: AtomicI64,
}

impl LocalTimeSource {
    /// Create a local source
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for LocalTimeSource {
    fn now(&self) -> Result<Timestamp> {
        let wall = Utc::now().timestamp_micros();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Ok(wall.max(prev + 1))
    }
}

// ===== Counter =====

/// Deterministic counter starting after `initial`
#[derive(Debug, Default)]
pub struct CounterTimeSource {
    counter: AtomicI64,
}

impl CounterTimeSource {
    /// Counter whose first timestamp is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose first timestamp is `initial + 1`
    pub fn with_initial(initial: Timestamp) -> Self {
        CounterTimeSource {
            counter: AtomicI64::new(initial),
        }
    }

    /// Last timestamp handed out
    pub fn current(&self) -> Timestamp {
        self.counter.load(Ordering::SeqCst)
    }
}

impl TimeSource for CounterTimeSource {
    fn now(&self) -> Result<Timestamp> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// ===== Hybrid =====

#[derive(Debug)]
struct HybridClock {
    physical_ms: i64,
    logical: i64,
    refreshed_at: std::time::Instant,
}

/// Physical milliseconds combined with a logical counter
///
/// Timestamps are `physical_ms * 10^logical_digits + logical`. The physical
/// part is refreshed every `refresh_interval`, or early when the logical
/// counter is about to overflow its digits.
#[derive(Debug)]
pub struct HybridTimeSource {
    refresh_interval: Duration,
    scale: i64,
    clock: Mutex<HybridClock>,
}

impl HybridTimeSource {
    /// Widest logical part that keeps current epoch milliseconds within `i64`
    pub const MAX_LOGICAL_DIGITS: u32 = 6;

    /// Create a hybrid source
    ///
    /// Fails with [`Error::InvalidConfig`] when `logical_digits` is zero or
    /// above [`Self::MAX_LOGICAL_DIGITS`].
    pub fn new(refresh_interval: Duration, logical_digits: u32) -> Result<Self> {
        if logical_digits == 0 || logical_digits > Self::MAX_LOGICAL_DIGITS {
            return Err(Error::InvalidConfig(format!(
                "hybrid time source needs 1..={} logical digits, got {}",
                Self::MAX_LOGICAL_DIGITS,
                logical_digits
            )));
        }
        Ok(HybridTimeSource {
            refresh_interval,
            scale: 10_i64.pow(logical_digits),
            clock: Mutex::new(HybridClock {
                physical_ms: Utc::now().timestamp_millis(),
                logical: 0,
                refreshed_at: std::time::Instant::now(),
            }),
        })
    }
}

impl TimeSource for HybridTimeSource {
    fn now(&self) -> Result<Timestamp> {
        let mut clock = self.clock.lock();
        let stale = clock.refreshed_at.elapsed() >= self.refresh_interval;
        let exhausted = clock.logical >= self.scale - 1;
        if stale || exhausted {
            let wall = Utc::now().timestamp_millis();
            clock.refreshed_at = std::time::Instant::now();
            if wall > clock.physical_ms {
                clock.physical_ms = wall;
                clock.logical = 0;
            } else if exhausted {
                // wall clock has not moved; borrow the next millisecond
                clock.physical_ms += 1;
                clock.logical = 0;
            }
        }
        clock.logical += 1;
        Ok(clock.physical_ms * self.scale + clock.logical)
    }
}

// ===== Global =====

/// Timestamps from a shared HTTP oracle
///
/// Issues `GET {url}/timestamp/common` and parses the body as an integer.
#[derive(Debug)]
pub struct GlobalTimeSource {
    endpoint: String,
    agent: ureq::Agent,
}

impl GlobalTimeSource {
    /// Create a source for the oracle at `url`
    pub fn new(url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        GlobalTimeSource {
            endpoint: format!("{}/timestamp/common", url.trim_end_matches('/')),
            agent,
        }
    }
}

impl TimeSource for GlobalTimeSource {
    fn now(&self) -> Result<Timestamp> {
        let body = self
            .agent
            .get(&self.endpoint)
            .call()
            .map_err(|e| Error::TimeSource(format!("{}: {}", self.endpoint, e)))?
            .into_string()
            .map_err(|e| Error::TimeSource(e.to_string()))?;
        let ts = body
            .trim()
            .parse::<Timestamp>()
            .map_err(|e| Error::TimeSource(format!("bad timestamp '{}': {}", body.trim(), e)))?;
        debug!(ts, "timestamp from oracle");
        Ok(ts)
    }
}
