//! Call sign prefix geolocation.
//!
//! The prefix table maps call prefixes to approximate coordinates. It is
//! fetched as a flat text file and rebuilt wholesale on every refresh; a
//! lookup picks the longest prefix that the call starts with.
//!
//! # File Format
//!
//! ```text
//! # prefix  lat     lng
//! W         37.53   -91.67
//! W1        42.30   -71.60
//! JA        36.40   138.38
//! ```
//!
//! Extra columns after the longitude are ignored.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::geo::LatLng;

/// Default source of the prefix table.
pub const DEFAULT_PREFIX_URL: &str =
    "http://clearskyinstitute.com/ham/HamClock/cty/cty_wt_mod-ll-dxcc.txt";

/// Number of index buckets: `0`-`9` then `A`-`Z`.
const BUCKETS: usize = 36;

/// Errors refreshing the prefix table. The previous table is always kept.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Prefix table fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Bad prefix table row {line}: {text:?}")]
    BadRow { line: usize, text: String },

    #[error("Prefix table too small: {rows} rows, need more than {min}")]
    TooFewRows { rows: usize, min: usize },
}

/// One prefix and its location.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixRow {
    pub prefix: String,
    pub location: LatLng,
}

/// Sorted prefix rows with a first-character index.
#[derive(Debug, Clone)]
pub struct PrefixTable {
    rows: Vec<PrefixRow>,
    index: [Option<usize>; BUCKETS],
}

impl Default for PrefixTable {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: [None; BUCKETS],
        }
    }
}

/// Map a leading character to its bucket.
fn bucket_of(c: char) -> Option<usize> {
    match c.to_ascii_uppercase() {
        d @ '0'..='9' => Some(d as usize - '0' as usize),
        a @ 'A'..='Z' => Some(10 + a as usize - 'A' as usize),
        _ => None,
    }
}

impl PrefixTable {
    /// Build a table from rows in any order. Rows whose prefix does not start
    /// with a digit or letter can never match and are dropped.
    pub fn from_rows(rows: impl IntoIterator<Item = PrefixRow>) -> Self {
        let mut rows: Vec<PrefixRow> = rows
            .into_iter()
            .map(|mut row| {
                row.prefix.make_ascii_uppercase();
                row
            })
            .filter(|row| row.prefix.chars().next().and_then(bucket_of).is_some())
            .collect();
        rows.sort_by(|a, b| a.prefix.cmp(&b.prefix));

        let mut index = [None; BUCKETS];
        for (slot, row) in rows.iter().enumerate() {
            if let Some(b) = row.prefix.chars().next().and_then(bucket_of)
                && index[b].is_none()
            {
                index[b] = Some(slot);
            }
        }

        Self { rows, index }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Longest-prefix match for `call`. Ties go to the first row seen.
    pub fn lookup(&self, call: &str) -> Option<LatLng> {
        let call = call.trim().to_ascii_uppercase();
        let first = call.chars().next()?;
        let start = self.index.get(bucket_of(first)?).copied().flatten()?;

        let mut best: Option<&PrefixRow> = None;
        for row in self.rows[start..]
            .iter()
            .take_while(|row| row.prefix.starts_with(first))
        {
            if call.starts_with(&row.prefix)
                && best.is_none_or(|b| row.prefix.len() > b.prefix.len())
            {
                best = Some(row);
            }
        }

        best.map(|row| row.location)
    }
}

/// Parse prefix table text. Any malformed data row fails the whole payload.
pub fn parse_prefix_table(content: &str) -> Result<PrefixTable, RefreshError> {
    let mut rows = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let bad_row = || RefreshError::BadRow {
            line: i + 1,
            text: trimmed.to_string(),
        };

        let mut fields = trimmed.split_whitespace();
        let prefix = fields.next().ok_or_else(bad_row)?;
        let lat: f64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(bad_row)?;
        let lng: f64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(bad_row)?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(bad_row());
        }

        rows.push(PrefixRow {
            prefix: prefix.to_string(),
            location: LatLng::from_degrees(lat, lng),
        });
    }

    Ok(PrefixTable::from_rows(rows))
}

/// Outcome of a refresh check that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The current table is still within its refresh interval.
    Fresh,
    /// A new table with this many rows was installed.
    Loaded(usize),
}

/// Configuration for the resolver.
#[derive(Debug, Clone)]
pub struct PrefixResolverConfig {
    pub url: String,
    pub refresh_interval: Duration,
    pub min_rows: usize,
    pub fetch_timeout: Duration,
}

impl Default for PrefixResolverConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PREFIX_URL.to_string(),
            refresh_interval: Duration::from_secs(24 * 3600),
            min_rows: 1000,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the current prefix table and keeps it fresh.
pub struct PrefixResolver {
    config: PrefixResolverConfig,
    table: PrefixTable,
    loaded_at: Option<DateTime<Utc>>,
    next_attempt: Option<DateTime<Utc>>,
    http: reqwest::Client,
}

impl PrefixResolver {
    pub fn new(config: PrefixResolverConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            table: PrefixTable::default(),
            loaded_at: None,
            next_attempt: None,
            http,
        }
    }

    fn refresh_interval(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.refresh_interval).unwrap_or(TimeDelta::hours(24))
    }

    /// Whether a refresh should be attempted at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if let Some(next) = self.next_attempt
            && now < next
        {
            return false;
        }
        match self.loaded_at {
            Some(at) => now - at > self.refresh_interval(),
            None => true,
        }
    }

    /// Fetch a new table if the current one is older than the refresh interval.
    pub async fn refresh_if_stale(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<RefreshStatus, RefreshError> {
        if !self.is_stale(now) {
            return Ok(RefreshStatus::Fresh);
        }

        info!("Fetching prefix table from {}", self.config.url);
        let fetched = self.fetch().await;
        let result = fetched.and_then(|content| self.install(&content, now));
        if let Err(ref e) = result {
            warn!("Prefix table refresh failed, keeping {} rows: {}", self.table.len(), e);
            self.next_attempt = Some(now + self.failure_backoff());
        }
        result.map(RefreshStatus::Loaded)
    }

    /// A failed refresh waits an hour, or the full interval when that is shorter.
    fn failure_backoff(&self) -> TimeDelta {
        self.refresh_interval().min(TimeDelta::hours(1))
    }

    async fn fetch(&self) -> Result<String, RefreshError> {
        let content = self
            .http
            .get(&self.config.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(content)
    }

    /// Parse `content` and install it if it holds enough rows.
    ///
    /// Returns the new row count. On error the previous table stays in place.
    pub fn install(&mut self, content: &str, now: DateTime<Utc>) -> Result<usize, RefreshError> {
        let table = parse_prefix_table(content)?;
        if table.len() <= self.config.min_rows {
            return Err(RefreshError::TooFewRows {
                rows: table.len(),
                min: self.config.min_rows,
            });
        }

        let rows = table.len();
        self.table = table;
        self.loaded_at = Some(now);
        self.next_attempt = None;
        info!("Loaded prefix table with {} rows", rows);
        Ok(rows)
    }

    /// Look up the location of `call` in the current table.
    pub fn lookup(&self, call: &str) -> Option<LatLng> {
        let found = self.table.lookup(call);
        if found.is_none() {
            debug!("No prefix match for {}", call);
        }
        found
    }

    pub fn table(&self) -> &PrefixTable {
        &self.table
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}
