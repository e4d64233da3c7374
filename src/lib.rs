//! DX Spot Feed - A Rust library and service for live DX spots.
//!
//! This crate provides:
//! - A telnet client for DX cluster nodes that detects the node dialect at
//!   login, and a UDP listener for WSJT-X status datagrams
//! - Decoders for cluster spot lines (nom) and binary status datagrams
//! - A call prefix geolocation table with longest-prefix lookup
//! - A bounded, time-ordered spot list with scrolling and nearest-spot queries
//! - Statistics tracking with HDR histograms and a Prometheus endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use dx_spot_feed::{FeedConfig, SpotFeed, SpotStats};
//!
//! # async fn run() {
//! let stats = Arc::new(SpotStats::new());
//! let mut feed = SpotFeed::new(FeedConfig::default(), Arc::clone(&stats));
//!
//! loop {
//!     feed.service(Utc::now()).await;
//!     for spot in feed.spots().visible() {
//!         println!("{}", spot);
//!     }
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! }
//! # }
//! ```

pub mod client;
pub mod config;
pub mod decode;
pub mod feed;
pub mod geo;
pub mod http;
pub mod parser;
pub mod prefix;
pub mod ratelimit;
pub mod spot;
pub mod stats;
pub mod storage;
pub mod wsjtx;

pub use client::{ClientConfig, ConnectError, Dialect, SourceKind, SpotClient, detect_dialect};
pub use config::Config;
pub use decode::{DecodeError, DecodeOutcome, decode_cluster_line, decode_datagram};
pub use feed::{FeedCommand, FeedConfig, FeedSnapshot, SpotFeed};
pub use geo::{LatLng, grid_to_ll, ll_to_grid};
pub use parser::{ParseError, looks_like_spot, parse_spot_line};
pub use prefix::{PrefixResolver, PrefixTable};
pub use spot::{Endpoint, SpotRecord};
pub use stats::{SpotStats, StatsSummary};
pub use storage::{InsertOutcome, SpotList};
