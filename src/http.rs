//! HTTP server for metrics and the spot query surface.
//!
//! Exposes feed statistics in Prometheus text format, plus JSON views of the
//! current spots. Reads come from the latest published [`FeedSnapshot`];
//! anything that changes the feed is sent to the host loop as a
//! [`FeedCommand`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::feed::{FeedCommand, FeedSnapshot};
use crate::geo::{EARTH_RADIUS_KM, LatLng};
use crate::stats::SpotStats;

/// Radius used by `/spots/nearest` when the query gives none.
const DEFAULT_NEAREST_KM: f64 = 500.0;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<SpotStats>,
    pub snapshot: watch::Receiver<FeedSnapshot>,
    pub commands: mpsc::Sender<FeedCommand>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/spots", get(spots_handler))
        .route("/spots/visible", get(visible_handler))
        .route("/spots/nearest", get(nearest_handler))
        .route("/reconnect", post(reconnect_handler))
        .route("/scroll/up", post(scroll_up_handler))
        .route("/scroll/down", post(scroll_down_handler))
        .route("/scroll/newest", post(scroll_newest_handler))
        .with_state(state)
}

/// Start the HTTP server.
///
/// Runs until the process exits. Returns an error if the server fails to bind
/// to the port.
pub async fn start_http_server(port: u16, state: AppState) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.borrow().clone();
    let output = format_prometheus_metrics(&state.stats, &snapshot);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// The whole latest snapshot.
async fn status_handler(State(state): State<AppState>) -> Json<FeedSnapshot> {
    Json(state.snapshot.borrow().clone())
}

/// All stored spots, oldest first.
async fn spots_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshot.borrow();
    Json(serde_json::json!({
        "count": snapshot.count,
        "capacity": snapshot.capacity,
        "spots": snapshot.spots,
    }))
}

/// The rows in the scroll window.
async fn visible_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshot.borrow();
    Json(serde_json::json!({
        "window": snapshot.window,
        "at_newest": snapshot.at_newest,
        "show_path": snapshot.show_path,
        "rows": snapshot.visible,
    }))
}

/// Query for `/spots/nearest`, in degrees and kilometres.
#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
    pub max_km: Option<f64>,
}

async fn nearest_handler(
    State(state): State<AppState>,
    Query(query): Query<NearestQuery>,
) -> Response {
    let point = LatLng::from_degrees(query.lat, query.lng);
    if !point.is_valid() {
        return (StatusCode::BAD_REQUEST, "lat/lng out of range").into_response();
    }
    let max_distance = query.max_km.unwrap_or(DEFAULT_NEAREST_KM) / EARTH_RADIUS_KM;

    let (reply, answer) = oneshot::channel();
    let command = FeedCommand::Nearest {
        point,
        max_distance,
        reply,
    };
    if state.commands.send(command).await.is_err() {
        return feed_gone();
    }
    match answer.await {
        Ok(Some(nearest)) => Json(nearest).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No spot within range").into_response(),
        Err(_) => feed_gone(),
    }
}

fn feed_gone() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Feed is shutting down").into_response()
}

async fn send_command(state: &AppState, command: FeedCommand) -> Response {
    match state.commands.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(_) => feed_gone(),
    }
}

async fn reconnect_handler(State(state): State<AppState>) -> Response {
    send_command(&state, FeedCommand::Reconnect).await
}

async fn scroll_up_handler(State(state): State<AppState>) -> Response {
    send_command(&state, FeedCommand::ScrollUp).await
}

async fn scroll_down_handler(State(state): State<AppState>) -> Response {
    send_command(&state, FeedCommand::ScrollDown).await
}

async fn scroll_newest_handler(State(state): State<AppState>) -> Response {
    send_command(&state, FeedCommand::JumpToNewest).await
}

/// Format statistics and feed state as Prometheus text format.
pub fn format_prometheus_metrics(stats: &SpotStats, snapshot: &FeedSnapshot) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(4096);

    // Uptime
    output.push_str("# HELP dxfeed_uptime_seconds Time since the feed started\n");
    output.push_str("# TYPE dxfeed_uptime_seconds gauge\n");
    output.push_str(&format!("dxfeed_uptime_seconds {:.3}\n", summary.elapsed_secs));

    // Connection
    output.push_str("# HELP dxfeed_connected Whether the spot source is connected\n");
    output.push_str("# TYPE dxfeed_connected gauge\n");
    output.push_str(&format!("dxfeed_connected {}\n", u8::from(snapshot.connected)));

    output.push_str("# HELP dxfeed_connects_this_hour Connection attempts in the current hour\n");
    output.push_str("# TYPE dxfeed_connects_this_hour gauge\n");
    output.push_str(&format!(
        "dxfeed_connects_this_hour {}\n",
        snapshot.connects_this_hour
    ));

    // Inputs
    output.push_str("# HELP dxfeed_inputs_total Lines and datagrams received\n");
    output.push_str("# TYPE dxfeed_inputs_total counter\n");
    output.push_str(&format!(
        "dxfeed_inputs_total{{kind=\"line\"}} {}\n",
        summary.lines_received
    ));
    output.push_str(&format!(
        "dxfeed_inputs_total{{kind=\"datagram\"}} {}\n",
        summary.datagrams_received
    ));

    output.push_str("# HELP dxfeed_bytes_received_total Total bytes received from the source\n");
    output.push_str("# TYPE dxfeed_bytes_received_total counter\n");
    output.push_str(&format!(
        "dxfeed_bytes_received_total {}\n",
        summary.bytes_received
    ));

    // Decode outcomes
    output.push_str("# HELP dxfeed_decode_total Decoder results by outcome\n");
    output.push_str("# TYPE dxfeed_decode_total counter\n");
    for (outcome, count) in [
        ("decoded", summary.decoded),
        ("ignored", summary.ignored),
        ("malformed", summary.malformed),
    ] {
        output.push_str(&format!(
            "dxfeed_decode_total{{outcome=\"{}\"}} {}\n",
            outcome, count
        ));
    }

    output.push_str("# HELP dxfeed_unresolved_total Spots dropped for want of a prefix location\n");
    output.push_str("# TYPE dxfeed_unresolved_total counter\n");
    output.push_str(&format!("dxfeed_unresolved_total {}\n", summary.unresolved));

    // Insert outcomes
    output.push_str("# HELP dxfeed_insert_total Spot list results by outcome\n");
    output.push_str("# TYPE dxfeed_insert_total counter\n");
    for (outcome, count) in [
        ("inserted", summary.inserted),
        ("evicted", summary.evictions),
        ("duplicate", summary.duplicates),
        ("too_old", summary.too_old),
    ] {
        output.push_str(&format!(
            "dxfeed_insert_total{{outcome=\"{}\"}} {}\n",
            outcome, count
        ));
    }

    output.push_str("# HELP dxfeed_spots_stored Spots currently in the list\n");
    output.push_str("# TYPE dxfeed_spots_stored gauge\n");
    output.push_str(&format!("dxfeed_spots_stored {}\n", snapshot.count));

    output.push_str("# HELP dxfeed_prefix_rows Rows in the prefix table\n");
    output.push_str("# TYPE dxfeed_prefix_rows gauge\n");
    output.push_str(&format!("dxfeed_prefix_rows {}\n", snapshot.prefix_rows));

    // Connection events
    output.push_str("# HELP dxfeed_connects_total Successful connects\n");
    output.push_str("# TYPE dxfeed_connects_total counter\n");
    output.push_str(&format!("dxfeed_connects_total {}\n", summary.connects));

    output.push_str("# HELP dxfeed_connect_failures_total Failed connect attempts\n");
    output.push_str("# TYPE dxfeed_connect_failures_total counter\n");
    output.push_str(&format!(
        "dxfeed_connect_failures_total {}\n",
        summary.connect_failures
    ));

    output.push_str("# HELP dxfeed_heartbeats_total Heartbeats sent to idle sessions\n");
    output.push_str("# TYPE dxfeed_heartbeats_total counter\n");
    output.push_str(&format!("dxfeed_heartbeats_total {}\n", summary.heartbeats));

    // Spots by band
    output.push_str("# HELP dxfeed_spots_by_band_total Decoded spots by amateur band\n");
    output.push_str("# TYPE dxfeed_spots_by_band_total counter\n");
    for (band, count) in &summary.spots_by_band {
        output.push_str(&format!(
            "dxfeed_spots_by_band_total{{band=\"{}\"}} {}\n",
            band, count
        ));
    }

    // Spot age summary
    if let Some(ref age) = summary.age_percentiles {
        output.push_str("# HELP dxfeed_spot_age_seconds Spot age at arrival\n");
        output.push_str("# TYPE dxfeed_spot_age_seconds summary\n");
        output.push_str(&format!(
            "dxfeed_spot_age_seconds{{quantile=\"0.5\"}} {}\n",
            age.p50
        ));
        output.push_str(&format!(
            "dxfeed_spot_age_seconds{{quantile=\"0.9\"}} {}\n",
            age.p90
        ));
        output.push_str(&format!(
            "dxfeed_spot_age_seconds{{quantile=\"0.99\"}} {}\n",
            age.p99
        ));
        output.push_str(&format!("dxfeed_spot_age_seconds_count {}\n", summary.decoded));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeOutcome;
    use crate::feed::{FeedConfig, SpotFeed};
    use crate::spot::SpotRecord;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 22, 0, 0).unwrap()
    }

    fn feed_with_spots() -> SpotFeed {
        let mut feed = SpotFeed::new(
            FeedConfig {
                visible_rows: 1,
                ..Default::default()
            },
            Arc::new(SpotStats::new()),
        );
        for (i, call) in ["JA1XYZ", "G4ABC"].iter().enumerate() {
            let spot = SpotRecord::new(
                "K1ABC",
                call,
                LatLng::from_degrees(42.0, -71.0),
                LatLng::from_degrees(51.5, -0.1),
                14074.0 + i as f64,
                now() - TimeDelta::minutes(5 - i as i64),
            );
            feed.stats().record_outcome(&DecodeOutcome::Decoded(spot.clone()), now());
            feed.spots_mut().insert(spot);
        }
        feed
    }

    fn app_state(feed: &SpotFeed) -> (AppState, mpsc::Receiver<FeedCommand>) {
        let (_snapshot_tx, snapshot) = watch::channel(feed.snapshot(now()));
        let (commands, rx) = mpsc::channel(8);
        let state = AppState {
            stats: Arc::clone(feed.stats()),
            snapshot,
            commands,
        };
        (state, rx)
    }

    #[test]
    fn test_format_prometheus_metrics_empty() {
        let feed = SpotFeed::new(FeedConfig::default(), Arc::new(SpotStats::new()));
        let output = format_prometheus_metrics(feed.stats(), &feed.snapshot(now()));

        assert!(output.contains("dxfeed_uptime_seconds"));
        assert!(output.contains("dxfeed_connected 0"));
        assert!(output.contains("dxfeed_decode_total{outcome=\"malformed\"} 0"));
        assert!(output.contains("dxfeed_spots_stored 0"));
        assert!(!output.contains("dxfeed_spot_age_seconds{"));
    }

    #[test]
    fn test_format_prometheus_metrics_with_data() {
        let feed = feed_with_spots();
        let output = format_prometheus_metrics(feed.stats(), &feed.snapshot(now()));

        assert!(output.contains("dxfeed_decode_total{outcome=\"decoded\"} 2"));
        assert!(output.contains("dxfeed_spots_stored 2"));
        assert!(output.contains("dxfeed_spots_by_band_total{band=\"20m\"} 2"));
        assert!(output.contains("dxfeed_spot_age_seconds_count 2"));
    }

    #[test]
    fn test_prometheus_format_validity() {
        let feed = feed_with_spots();
        let output = format_prometheus_metrics(feed.stats(), &feed.snapshot(now()));

        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            assert!(parts.len() >= 2, "Invalid metric line: {}", line);
        }
    }

    #[tokio::test]
    async fn test_spot_views() {
        let feed = feed_with_spots();
        let (state, _rx) = app_state(&feed);

        let Json(spots) = spots_handler(State(state.clone())).await;
        assert_eq!(spots["count"], 2);
        assert_eq!(spots["spots"][0]["target_call"], "JA1XYZ");

        let Json(visible) = visible_handler(State(state)).await;
        assert_eq!(visible["rows"].as_array().map(Vec::len), Some(1));
        assert_eq!(visible["rows"][0]["target_label"], "G4ABC");
        assert_eq!(visible["at_newest"], true);
    }

    #[tokio::test]
    async fn test_nearest_round_trip_through_feed() {
        let mut feed = feed_with_spots();
        let (state, mut rx) = app_state(&feed);

        let query = NearestQuery {
            lat: 51.4,
            lng: 0.0,
            max_km: Some(100.0),
        };
        let request = tokio::spawn(nearest_handler(State(state.clone()), Query(query)));
        let command = rx.recv().await.unwrap();
        feed.apply(command);
        let response = request.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let far = NearestQuery {
            lat: -45.0,
            lng: 170.0,
            max_km: None,
        };
        let request = tokio::spawn(nearest_handler(State(state), Query(far)));
        feed.apply(rx.recv().await.unwrap());
        assert_eq!(request.await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_commands_forwarded() {
        let feed = feed_with_spots();
        let (state, mut rx) = app_state(&feed);

        let response = scroll_up_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(FeedCommand::ScrollUp)));

        let response = reconnect_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(FeedCommand::Reconnect)));

        drop(rx);
        let response = scroll_newest_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_bad_coordinates_rejected() {
        let feed = feed_with_spots();
        let (state, _rx) = app_state(&feed);
        let query = NearestQuery {
            lat: 95.0,
            lng: 0.0,
            max_km: None,
        };
        let response = nearest_handler(State(state), Query(query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
