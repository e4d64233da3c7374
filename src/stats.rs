//! Statistics for the spot feed.
//!
//! Counters cover every stage a line or datagram passes through: receipt,
//! decoding, and insertion into the spot list. Connection events are counted
//! too, and an HDR histogram tracks how stale spots are when they arrive.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::decode::{DecodeError, DecodeOutcome};
use crate::spot::SpotRecord;
use crate::storage::InsertOutcome;

/// Largest spot age the histogram tracks, one day in seconds.
const MAX_AGE_SECS: u64 = 86_400;

/// Thread-safe statistics collector for the spot feed.
#[derive(Debug)]
pub struct SpotStats {
    /// Cluster lines received
    pub lines_received: AtomicU64,

    /// Status datagrams received
    pub datagrams_received: AtomicU64,

    /// Raw bytes received from the source
    pub bytes_received: AtomicU64,

    /// Inputs that decoded to a spot
    pub decoded: AtomicU64,

    /// Inputs that were valid but not spots
    pub ignored: AtomicU64,

    /// Inputs that should have been spots but did not decode
    pub malformed: AtomicU64,

    /// Spots dropped because a call had no prefix location
    pub unresolved: AtomicU64,

    /// Spots stored in the list
    pub inserted: AtomicU64,

    /// Stored spots that pushed out the oldest entry
    pub evictions: AtomicU64,

    /// Spots rejected as duplicates
    pub duplicates: AtomicU64,

    /// Spots rejected as older than a full list's oldest entry
    pub too_old: AtomicU64,

    /// Successful connects
    pub connects: AtomicU64,

    /// Failed connects, rate limiting included
    pub connect_failures: AtomicU64,

    /// Heartbeats sent
    pub heartbeats: AtomicU64,

    /// Seconds between a spot's timestamp and its arrival
    age_histogram: RwLock<Option<Histogram<u64>>>,

    /// Decoded spots per band
    spots_by_band: RwLock<HashMap<String, u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl SpotStats {
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unresolved: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            too_old: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            age_histogram: RwLock::new(Histogram::new_with_bounds(1, MAX_AGE_SECS, 2).ok()),
            spots_by_band: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a cluster line of `bytes` length (terminator excluded).
    pub fn record_line(&self, bytes: usize) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a status datagram of `bytes` length.
    pub fn record_datagram(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record what a decoder made of one input received at `now`.
    pub fn record_outcome(&self, outcome: &DecodeOutcome, now: DateTime<Utc>) {
        match outcome {
            DecodeOutcome::Decoded(spot) => self.record_spot(spot, now),
            DecodeOutcome::Ignored => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
            DecodeOutcome::Malformed(DecodeError::Unresolved(_)) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                self.unresolved.fetch_add(1, Ordering::Relaxed);
            }
            DecodeOutcome::Malformed(_) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_spot(&self, spot: &SpotRecord, now: DateTime<Utc>) {
        self.decoded.fetch_add(1, Ordering::Relaxed);

        let age = (now - spot.spotted_at).num_seconds().max(1) as u64;
        if let Ok(mut guard) = self.age_histogram.write()
            && let Some(hist) = guard.as_mut()
        {
            let _ = hist.record(age.min(MAX_AGE_SECS));
        }

        if let Some(band) = spot.band()
            && let Ok(mut map) = self.spots_by_band.write()
        {
            *map.entry(band.to_string()).or_insert(0) += 1;
        }
    }

    /// Record what the spot list did with a decoded spot.
    pub fn record_insert(&self, outcome: InsertOutcome) {
        let counter = match outcome {
            InsertOutcome::Inserted => &self.inserted,
            InsertOutcome::EvictedOldestAndInserted => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                &self.inserted
            }
            InsertOutcome::RejectedDuplicate => &self.duplicates,
            InsertOutcome::RejectedTooOld => &self.too_old,
            // Decoders only hand over usable spots.
            InsertOutcome::RejectedUnusable => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Decoded spots per second since start.
    pub fn spots_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.decoded.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let age_percentiles = self.age_histogram.read().ok().and_then(|guard| {
            guard
                .as_ref()
                .filter(|h| !h.is_empty())
                .map(|h| HistogramPercentiles {
                    p50: h.value_at_quantile(0.50),
                    p90: h.value_at_quantile(0.90),
                    p99: h.value_at_quantile(0.99),
                    min: h.min(),
                    max: h.max(),
                    mean: h.mean(),
                })
        });

        let spots_by_band = self
            .spots_by_band
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            too_old: self.too_old.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            spots_per_second: self.spots_per_second(),
            age_percentiles,
            spots_by_band,
        }
    }
}

impl Default for SpotStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub lines_received: u64,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub decoded: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub unresolved: u64,
    pub inserted: u64,
    pub evictions: u64,
    pub duplicates: u64,
    pub too_old: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub heartbeats: u64,
    pub spots_per_second: f64,
    pub age_percentiles: Option<HistogramPercentiles>,
    pub spots_by_band: HashMap<String, u64>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                  DX SPOT FEED STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(
            f,
            "Received: {} lines, {} datagrams, {} KB",
            self.lines_received,
            self.datagrams_received,
            self.bytes_received / 1024
        )?;
        writeln!(
            f,
            "Decoded: {} (ignored {}, malformed {}, unresolved {})",
            self.decoded, self.ignored, self.malformed, self.unresolved
        )?;
        writeln!(
            f,
            "Stored: {} (evicted {}, duplicates {}, too old {})",
            self.inserted, self.evictions, self.duplicates, self.too_old
        )?;
        writeln!(
            f,
            "Connects: {} (failed {}), heartbeats: {}",
            self.connects, self.connect_failures, self.heartbeats
        )?;
        writeln!(f, "Rate: {:.2} spots/sec", self.spots_per_second)?;
        writeln!(f)?;

        if let Some(ref p) = self.age_percentiles {
            writeln!(f, "Spot Age at Arrival (s):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
            writeln!(f)?;
        }

        if !self.spots_by_band.is_empty() {
            writeln!(f, "Spots by Band:")?;
            let mut bands: Vec<_> = self.spots_by_band.iter().collect();
            bands.sort_by(|a, b| b.1.cmp(a.1));
            for (band, count) in bands {
                writeln!(f, "  {}: {}", band, count)?;
            }
        }

        Ok(())
    }
}
