//! Hourly connection-attempt quota.
//!
//! Cluster nodes are shared, volunteer-run services; a client stuck in a
//! reconnect loop must not hammer them. Attempts are counted per UTC clock
//! hour and the count resets when the hour rolls over.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

/// Counts connection attempts within the current clock hour.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectQuota {
    max_per_hour: u32,
    hour_start: Option<DateTime<Utc>>,
    attempts: u32,
}

impl ConnectQuota {
    pub fn new(max_per_hour: u32) -> Self {
        Self {
            max_per_hour,
            hour_start: None,
            attempts: 0,
        }
    }

    fn hour_of(now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now)
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let hour = Self::hour_of(now);
        if self.hour_start != Some(hour) {
            self.hour_start = Some(hour);
            self.attempts = 0;
        }
    }

    /// Record an attempt at `now` if the quota allows it.
    ///
    /// Returns false, without counting, once the hour's quota is used up.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.roll(now);
        if self.attempts >= self.max_per_hour {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Attempts counted in the hour containing `now`.
    pub fn attempts(&self, now: DateTime<Utc>) -> u32 {
        if self.hour_start == Some(Self::hour_of(now)) {
            self.attempts
        } else {
            0
        }
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    /// When the quota next resets: the top of the following hour.
    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Self::hour_of(now) + TimeDelta::hours(1)
    }
}
