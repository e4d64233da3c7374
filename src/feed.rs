//! The poll-driven spot feed.
//!
//! [`SpotFeed`] ties the connection, the decoders, the prefix resolver and
//! the spot list together. The host calls [`SpotFeed::service`] about once a
//! second; each call connects when a retry is due, drains whatever the source
//! has ready, and probes an idle session. Nothing runs in the background.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::client::{
    ClientConfig, ConnectError, Dialect, Incoming, Ready, SourceKind, SpotClient,
};
use crate::decode::{DecodeOutcome, decode_cluster_line, decode_datagram};
use crate::geo::LatLng;
use crate::prefix::{PrefixResolver, PrefixResolverConfig, RefreshStatus};
use crate::spot::{Endpoint, LabelStyle, SpotRecord};
use crate::stats::SpotStats;
use crate::storage::{ScrollWindow, SpotList};

/// Settings for [`SpotFeed`].
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub client: ClientConfig,
    pub prefixes: PrefixResolverConfig,
    pub capacity: usize,
    pub visible_rows: usize,
    /// Wait after a failed connect or a dropped connection.
    pub retry_delay: Duration,
    /// Heartbeat a telnet session after this long without a spot.
    pub idle_heartbeat: Duration,
    pub label_style: LabelStyle,
    pub show_path: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            prefixes: PrefixResolverConfig::default(),
            capacity: 100,
            visible_rows: 10,
            retry_delay: Duration::from_secs(60),
            idle_heartbeat: Duration::from_secs(600),
            label_style: LabelStyle::Call,
            show_path: false,
        }
    }
}

/// What one service pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceReport {
    pub connected: bool,
    pub received: usize,
    pub stored: usize,
}

/// Requests from the query surface, applied between service passes.
#[derive(Debug)]
pub enum FeedCommand {
    Reconnect,
    ScrollUp,
    ScrollDown,
    JumpToNewest,
    Nearest {
        point: LatLng,
        max_distance: f64,
        reply: oneshot::Sender<Option<NearestSpot>>,
    },
}

/// The spot endpoint closest to a queried point.
#[derive(Debug, Clone, Serialize)]
pub struct NearestSpot {
    pub spot: SpotRecord,
    pub end: Endpoint,
}

/// A visible row with its labels already chosen.
#[derive(Debug, Clone, Serialize)]
pub struct VisibleRow {
    pub origin_label: String,
    pub target_label: String,
    pub spot: SpotRecord,
}

/// Read-only copy of the feed state for other tasks.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub connected: bool,
    pub status: String,
    pub source: String,
    pub dialect: Option<Dialect>,
    pub count: usize,
    pub capacity: usize,
    pub spots: Vec<SpotRecord>,
    pub window: ScrollWindow,
    pub visible: Vec<VisibleRow>,
    pub at_newest: bool,
    pub label_style: LabelStyle,
    pub show_path: bool,
    pub prefix_rows: usize,
    /// Why the last prefix table refresh failed, until one succeeds.
    pub prefix_error: Option<String>,
    pub connects_this_hour: u32,
    pub max_connects_per_hour: u32,
    pub next_retry: Option<DateTime<Utc>>,
    pub taken_at: DateTime<Utc>,
}

/// Live spot feed for one configured source.
pub struct SpotFeed {
    client: SpotClient,
    resolver: PrefixResolver,
    spots: SpotList,
    stats: Arc<SpotStats>,
    retry_delay: TimeDelta,
    idle_heartbeat: TimeDelta,
    label_style: LabelStyle,
    show_path: bool,
    /// No connect before this instant. `None` means connect on the next pass.
    next_retry: Option<DateTime<Utc>>,
    /// Last decoded spot, or connect/heartbeat time, for idle detection.
    last_activity: Option<DateTime<Utc>>,
    status: String,
    prefix_error: Option<String>,
}

fn to_delta(d: Duration, fallback: TimeDelta) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(fallback)
}

impl SpotFeed {
    pub fn new(config: FeedConfig, stats: Arc<SpotStats>) -> Self {
        Self {
            client: SpotClient::new(config.client),
            resolver: PrefixResolver::new(config.prefixes),
            spots: SpotList::new(config.capacity, config.visible_rows),
            stats,
            retry_delay: to_delta(config.retry_delay, TimeDelta::minutes(1)),
            idle_heartbeat: to_delta(config.idle_heartbeat, TimeDelta::minutes(10)),
            label_style: config.label_style,
            show_path: config.show_path,
            next_retry: None,
            last_activity: None,
            status: "Not connected".to_string(),
            prefix_error: None,
        }
    }

    /// Run one pass: connect if due, drain input, heartbeat if idle.
    pub async fn service(&mut self, now: DateTime<Utc>) -> ServiceReport {
        if self.client.config().kind == SourceKind::Cluster {
            // The resolver backs off and retries on its own.
            match self.resolver.refresh_if_stale(now).await {
                Ok(RefreshStatus::Loaded(_)) => self.prefix_error = None,
                Ok(RefreshStatus::Fresh) => {}
                Err(e) => self.prefix_error = Some(e.to_string()),
            }
        }

        if !self.client.is_connected() && !self.try_connect(now).await {
            return ServiceReport::default();
        }

        let mut report = ServiceReport {
            connected: true,
            ..Default::default()
        };

        let drain = self.client.drain().await;
        for item in drain.items {
            report.received += 1;
            if self.ingest(item, now) {
                report.stored += 1;
            }
        }
        if let Some(e) = drain.error {
            self.drop_connection(now, format!("Connection lost: {}", e));
            report.connected = false;
            return report;
        }

        if self.is_idle(now) {
            self.stats.record_heartbeat();
            match self.client.heartbeat().await {
                Ok(()) => self.last_activity = Some(now),
                Err(e) => {
                    self.drop_connection(now, format!("Heartbeat failed: {}", e));
                    report.connected = false;
                }
            }
        }

        report
    }

    async fn try_connect(&mut self, now: DateTime<Utc>) -> bool {
        if self.next_retry.is_some_and(|at| now < at) {
            return false;
        }
        if self.client.config().kind == SourceKind::Cluster && self.resolver.table().is_empty() {
            self.status = match &self.prefix_error {
                Some(e) => format!("Waiting for prefix table: {}", e),
                None => "Waiting for prefix table".to_string(),
            };
            self.next_retry = Some(now + self.retry_delay);
            return false;
        }

        match self.client.connect_at(now).await {
            Ok(ready) => {
                self.stats.record_connect();
                self.status = match ready {
                    Ready::Cluster(dialect) => format!(
                        "Connected to {} ({})",
                        self.source_name(),
                        dialect.name()
                    ),
                    Ready::Wsjtx { local_addr } => format!("Listening on {}", local_addr),
                };
                info!("{}", self.status);
                self.next_retry = None;
                self.last_activity = Some(now);
                self.spots.jump_to_newest();
                true
            }
            Err(e) => {
                self.stats.record_connect_failure();
                self.next_retry = Some(match &e {
                    ConnectError::RateLimited { resets_at } => *resets_at,
                    _ => now + self.retry_delay,
                });
                self.status = e.to_string();
                false
            }
        }
    }

    /// Decode and store one input. Returns whether a spot was stored.
    fn ingest(&mut self, item: Incoming, now: DateTime<Utc>) -> bool {
        let outcome = match &item {
            Incoming::Line(line) => {
                self.stats.record_line(line.len());
                decode_cluster_line(line, now, &self.resolver)
            }
            Incoming::Datagram(bytes) => {
                self.stats.record_datagram(bytes.len());
                decode_datagram(bytes, now)
            }
        };
        self.stats.record_outcome(&outcome, now);

        match outcome {
            DecodeOutcome::Decoded(spot) => {
                self.last_activity = Some(now);
                let inserted = self.spots.insert(spot);
                self.stats.record_insert(inserted);
                inserted.is_stored()
            }
            DecodeOutcome::Ignored => false,
            DecodeOutcome::Malformed(e) => {
                debug!("Discarded input: {}", e);
                false
            }
        }
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.client.config().kind == SourceKind::Cluster
            && self
                .last_activity
                .is_some_and(|at| now - at > self.idle_heartbeat)
    }

    fn drop_connection(&mut self, now: DateTime<Utc>, reason: String) {
        warn!("{}", reason);
        self.client.close();
        self.status = reason;
        self.schedule_retry(now + self.retry_delay);
    }

    /// Set the earliest time of the next connect attempt.
    pub fn schedule_retry(&mut self, at: DateTime<Utc>) {
        self.next_retry = Some(at);
    }

    /// Close the connection and reconnect on the next pass.
    pub fn force_reconnect(&mut self) {
        info!("Reconnect requested");
        self.client.close();
        self.next_retry = None;
        self.status = "Reconnecting".to_string();
    }

    /// Close the connection without scheduling a retry.
    pub fn close(&mut self) {
        self.client.close();
        self.next_retry = None;
        self.status = "Not connected".to_string();
    }

    pub fn apply(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Reconnect => self.force_reconnect(),
            FeedCommand::ScrollUp => {
                self.spots.scroll_up();
            }
            FeedCommand::ScrollDown => {
                self.spots.scroll_down();
            }
            FeedCommand::JumpToNewest => self.spots.jump_to_newest(),
            FeedCommand::Nearest {
                point,
                max_distance,
                reply,
            } => {
                let _ = reply.send(self.nearest(point, max_distance));
            }
        }
    }

    pub fn nearest(&self, point: LatLng, max_distance: f64) -> Option<NearestSpot> {
        self.spots
            .nearest(point, max_distance)
            .map(|(spot, end)| NearestSpot {
                spot: spot.clone(),
                end,
            })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Short human-readable connection status.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn next_retry(&self) -> Option<DateTime<Utc>> {
        self.next_retry
    }

    pub fn spots(&self) -> &SpotList {
        &self.spots
    }

    pub fn spots_mut(&mut self) -> &mut SpotList {
        &mut self.spots
    }

    pub fn resolver_mut(&mut self) -> &mut PrefixResolver {
        &mut self.resolver
    }

    pub fn stats(&self) -> &Arc<SpotStats> {
        &self.stats
    }

    fn source_name(&self) -> String {
        let config = self.client.config();
        format!("{}:{}", config.host, config.port)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> FeedSnapshot {
        let visible = self
            .spots
            .visible()
            .iter()
            .map(|spot| VisibleRow {
                origin_label: spot.label(Endpoint::Origin, self.label_style).to_string(),
                target_label: spot.label(Endpoint::Target, self.label_style).to_string(),
                spot: spot.clone(),
            })
            .collect();

        let quota = self.client.quota();
        FeedSnapshot {
            connected: self.client.is_connected(),
            status: self.status.clone(),
            source: self.source_name(),
            dialect: self.client.dialect(),
            count: self.spots.len(),
            capacity: self.spots.capacity(),
            spots: self.spots.spots().to_vec(),
            window: self.spots.window(),
            visible,
            at_newest: self.spots.is_at_newest(),
            label_style: self.label_style,
            show_path: self.show_path,
            prefix_rows: self.resolver.table().len(),
            prefix_error: self.prefix_error.clone(),
            connects_this_hour: quota.attempts(now),
            max_connects_per_hour: quota.max_per_hour(),
            next_retry: self.next_retry,
            taken_at: now,
        }
    }
}
