//! The canonical spot record.
//!
//! Every decoder produces a [`SpotRecord`]; the container and the display
//! layer only ever see this shape, whichever source the spot came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::LatLng;

/// Maximum stored length of a call sign.
pub const MAX_CALL_LEN: usize = 11;

/// Which end of a spot a coordinate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// The station that posted the spot (DE).
    Origin,
    /// The station that was heard (DX).
    Target,
}

/// How the display layer labels a call sign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelStyle {
    /// The full call sign.
    #[default]
    Call,
    /// Only the call prefix, e.g. `JR1` for `JR1FYS`.
    Prefix,
}

/// Screen-space geometry cached by the renderer. Never touched by decoders.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayHint {
    pub origin_px: (i32, i32),
    pub target_px: (i32, i32),
    pub label_rect: (i32, i32, u16, u16),
}

/// A single normalized spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRecord {
    /// Station that reported the spot, upper case.
    pub origin_call: String,

    /// Station that was heard, upper case.
    pub target_call: String,

    /// Maidenhead locator of the origin, empty if unknown.
    pub origin_grid: String,

    /// Maidenhead locator of the target, empty if unknown.
    pub target_grid: String,

    pub origin: LatLng,
    pub target: LatLng,

    pub frequency_khz: f64,

    pub spotted_at: DateTime<Utc>,

    #[serde(skip)]
    pub display_hint: Option<DisplayHint>,
}

impl SpotRecord {
    /// Build a record, normalizing call signs and deriving grids from coordinates
    /// when none were supplied.
    pub fn new(
        origin_call: &str,
        target_call: &str,
        origin: LatLng,
        target: LatLng,
        frequency_khz: f64,
        spotted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            origin_call: normalize_call(origin_call),
            target_call: normalize_call(target_call),
            origin_grid: origin.to_grid(),
            target_grid: target.to_grid(),
            origin,
            target,
            frequency_khz,
            spotted_at,
            display_hint: None,
        }
    }

    /// Override the grids with the locators the source reported.
    pub fn with_grids(mut self, origin_grid: &str, target_grid: &str) -> Self {
        self.origin_grid = origin_grid.trim().to_string();
        self.target_grid = target_grid.trim().to_string();
        self
    }

    /// Whether every field the container relies on is filled in.
    pub fn is_usable(&self) -> bool {
        !self.origin_call.is_empty()
            && !self.target_call.is_empty()
            && (self.origin.is_valid() || self.target.is_valid())
            && self.frequency_khz > 0.0
            && self.spotted_at.timestamp() > 0
    }

    /// Location of one end of the spot.
    pub fn location(&self, end: Endpoint) -> LatLng {
        match end {
            Endpoint::Origin => self.origin,
            Endpoint::Target => self.target,
        }
    }

    /// Call sign of one end of the spot.
    pub fn call(&self, end: Endpoint) -> &str {
        match end {
            Endpoint::Origin => &self.origin_call,
            Endpoint::Target => &self.target_call,
        }
    }

    /// Label for one end of the spot in the given style.
    pub fn label(&self, end: Endpoint, style: LabelStyle) -> &str {
        let call = self.call(end);
        match style {
            LabelStyle::Call => call,
            LabelStyle::Prefix => call_prefix(call),
        }
    }

    /// Returns the amateur radio band for this spot's frequency.
    pub fn band(&self) -> Option<&'static str> {
        match self.frequency_khz as u32 {
            135..=138 => Some("2200m"),
            472..=479 => Some("630m"),
            1800..=2000 => Some("160m"),
            3500..=4000 => Some("80m"),
            5330..=5410 => Some("60m"),
            7000..=7300 => Some("40m"),
            10100..=10150 => Some("30m"),
            14000..=14350 => Some("20m"),
            18068..=18168 => Some("17m"),
            21000..=21450 => Some("15m"),
            24890..=24990 => Some("12m"),
            28000..=29700 => Some("10m"),
            50000..=54000 => Some("6m"),
            144000..=148000 => Some("2m"),
            _ => None,
        }
    }
}

impl fmt::Display for SpotRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) -> {} ({}) {:.1} kHz {}",
            self.origin_call,
            self.origin_grid,
            self.target_call,
            self.target_grid,
            self.frequency_khz,
            self.spotted_at.format("%H%MZ")
        )
    }
}

/// Upper-case a call sign and cut it to [`MAX_CALL_LEN`] characters.
pub fn normalize_call(call: &str) -> String {
    call.trim()
        .chars()
        .take(MAX_CALL_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// The prefix of a call: everything through the first run of digits after the
/// leading character.
///
/// For portable calls like `VE3/W1AW` a shorter leading segment is the prefix.
pub fn call_prefix(call: &str) -> &str {
    let base = match call.split_once('/') {
        Some((head, tail)) if head.len() < tail.split('/').next().unwrap_or("").len() => head,
        Some((head, _)) => head,
        None => call,
    };

    let bytes = base.as_bytes();
    let mut end = bytes.len().min(1);
    let mut seen_digit = false;
    for (i, b) in bytes.iter().enumerate().skip(1) {
        if b.is_ascii_digit() {
            seen_digit = true;
        } else if seen_digit {
            break;
        }
        end = i + 1;
    }
    &base[..end]
}
