//! Turning raw cluster lines and status datagrams into spot records.
//!
//! Each decoder returns a [`DecodeOutcome`]. Only `Decoded` carries a record,
//! and that record has passed [`SpotRecord::is_usable`]; partial records never
//! leave this module.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use thiserror::Error;

use crate::geo::{GridError, LatLng, grid_to_ll};
use crate::parser::{ParseError, looks_like_spot, parse_spot_line};
use crate::prefix::{PrefixResolver, PrefixTable};
use crate::spot::SpotRecord;
use crate::wsjtx::{Status, WireError, decode_status};

/// How far in the future a line time may be before it is taken as yesterday's.
const FUTURE_SLACK: TimeDelta = TimeDelta::minutes(5);

/// Why a line or datagram could not become a spot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("No prefix location for {0}")]
    Unresolved(String),

    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("Decoded spot is incomplete")]
    Unusable,
}

/// Result of feeding one line or datagram to a decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// A complete spot.
    Decoded(SpotRecord),
    /// Valid input that is not a spot (banner, prompt, other message type).
    Ignored,
    /// Input that should have been a spot but did not parse.
    Malformed(DecodeError),
}

impl DecodeOutcome {
    fn from_result(result: Result<SpotRecord, DecodeError>) -> Self {
        match result {
            Ok(spot) if spot.is_usable() => DecodeOutcome::Decoded(spot),
            Ok(_) => DecodeOutcome::Malformed(DecodeError::Unusable),
            Err(e) => DecodeOutcome::Malformed(e),
        }
    }
}

/// Something that can place a call sign on the map.
pub trait LocateCall {
    fn locate(&self, call: &str) -> Option<LatLng>;
}

impl LocateCall for PrefixTable {
    fn locate(&self, call: &str) -> Option<LatLng> {
        self.lookup(call)
    }
}

impl LocateCall for PrefixResolver {
    fn locate(&self, call: &str) -> Option<LatLng> {
        self.lookup(call)
    }
}

/// Attach a spot time of day to today's date, or yesterday's if that would put
/// it in the future.
pub fn spot_timestamp(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time).and_utc();
    if today > now + FUTURE_SLACK {
        today - TimeDelta::days(1)
    } else {
        today
    }
}

/// Decode one cluster line received at `now`.
pub fn decode_cluster_line(
    line: &str,
    now: DateTime<Utc>,
    locator: &impl LocateCall,
) -> DecodeOutcome {
    if !looks_like_spot(line) {
        return DecodeOutcome::Ignored;
    }
    DecodeOutcome::from_result(cluster_spot(line, now, locator))
}

fn cluster_spot(
    line: &str,
    now: DateTime<Utc>,
    locator: &impl LocateCall,
) -> Result<SpotRecord, DecodeError> {
    let parsed = parse_spot_line(line)?;

    // A trailing locator belongs to the spotter and beats the prefix guess.
    let origin = match parsed.grid.as_deref().map(grid_to_ll) {
        Some(Ok(ll)) => ll,
        _ => locator
            .locate(&parsed.spotter)
            .ok_or_else(|| DecodeError::Unresolved(parsed.spotter.clone()))?,
    };
    let target = locator
        .locate(&parsed.dx_call)
        .ok_or_else(|| DecodeError::Unresolved(parsed.dx_call.clone()))?;

    Ok(SpotRecord::new(
        &parsed.spotter,
        &parsed.dx_call,
        origin,
        target,
        parsed.frequency_khz,
        spot_timestamp(parsed.time, now),
    ))
}

/// Decode one status datagram received at `now`.
pub fn decode_datagram(datagram: &[u8], now: DateTime<Utc>) -> DecodeOutcome {
    let status = match decode_status(datagram) {
        Ok(Some(status)) => status,
        Ok(None) => return DecodeOutcome::Ignored,
        Err(e) => return DecodeOutcome::Malformed(e.into()),
    };

    // No contact selected in the application.
    if status.dx_call.trim().is_empty() || status.dx_grid.trim().is_empty() {
        return DecodeOutcome::Ignored;
    }

    DecodeOutcome::from_result(status_spot(&status, now))
}

fn status_spot(status: &Status<'_>, now: DateTime<Utc>) -> Result<SpotRecord, DecodeError> {
    if status.de_call.trim().is_empty() {
        return Err(DecodeError::MissingField("origin call"));
    }
    let origin = grid_to_ll(status.de_grid)?;
    let target = grid_to_ll(status.dx_grid)?;

    Ok(SpotRecord::new(
        status.de_call,
        status.dx_call,
        origin,
        target,
        status.dial_frequency_hz as f64 / 1000.0,
        now,
    )
    .with_grids(status.de_grid, status.dx_grid))
}
