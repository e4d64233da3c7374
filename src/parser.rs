//! Parser for DX cluster spot announcements.
//!
//! Both cluster dialects announce spots with the same fixed-width line, so a
//! single parser covers them. The leading fields are scanned with `nom`; the
//! UTC time is read from its fixed column near the end of the line.
//!
//! # Spot Format
//!
//! ```text
//! DX de SPOTTER:     FREQ  DXCALL       COMMENT                        HHMMZ GRID
//! ```
//!
//! Example:
//! ```text
//! DX de KD0AA:     18100.0  JR1FYS       FT8 LOUD in FL!                2156Z EL98
//! ```
//!
//! The time normally sits at columns 70-73 followed by `Z`. Servers that do
//! not pad to the standard widths are handled by falling back to the last
//! `HHMMZ` token on the line.

use chrono::NaiveTime;
use nom::{
    IResult, Parser,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, digit1, multispace1, space0, space1},
    combinator::{map_res, opt, recognize, value},
    sequence::terminated,
};
use thiserror::Error;

/// Column of the first time digit in a standard spot line.
pub const TIME_COLUMN: usize = 70;

/// Errors that can occur during parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid spot format: {0}")]
    InvalidFormat(String),

    #[error("Invalid frequency: {0}")]
    InvalidFrequency(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// The fields of one spot line, before geolocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotLine {
    pub spotter: String,
    pub frequency_khz: f64,
    pub dx_call: String,
    pub comment: String,
    pub time: NaiveTime,
    /// Locator some servers append after the time.
    pub grid: Option<String>,
}

/// Check if a character is valid in a callsign.
///
/// Valid callsign characters are alphanumeric plus `/` for portable designators
/// and `-` for suffixes like `-#` on skimmers.
fn is_callsign_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '/' || c == '-' || c == '#'
}

/// Parse the "DX de " prefix that starts every spot line.
fn parse_dx_de_prefix(input: &str) -> IResult<&str, ()> {
    value(
        (),
        (
            tag_no_case("DX"),
            multispace1,
            tag_no_case("de"),
            multispace1,
        ),
    )
    .parse(input)
}

/// Parse a callsign (spotter or DX station).
fn parse_callsign(input: &str) -> IResult<&str, &str> {
    take_while1(is_callsign_char).parse(input)
}

/// Parse the spotter callsign followed by a colon.
fn parse_spotter(input: &str) -> IResult<&str, &str> {
    terminated(parse_callsign, (char(':'), space0)).parse(input)
}

/// Parse a floating-point frequency in kHz.
fn parse_frequency(input: &str) -> IResult<&str, f64> {
    map_res(recognize((digit1, opt((char('.'), digit1)))), |s: &str| {
        s.parse::<f64>()
    })
    .parse(input)
}

/// Parse the leading `DX de CALL: FREQ DXCALL` fields, returning the rest.
fn parse_head(input: &str) -> IResult<&str, (&str, f64, &str)> {
    let (input, _) = parse_dx_de_prefix(input)?;
    let (input, spotter) = parse_spotter(input)?;
    let (input, _) = space0(input)?;
    let (input, frequency_khz) = parse_frequency(input)?;
    let (input, _) = space1(input)?;
    let (input, dx_call) = parse_callsign(input)?;
    Ok((input, (spotter, frequency_khz, dx_call)))
}

/// Convert 4 ASCII digits to a time of day.
fn hhmm(digits: &str) -> Option<NaiveTime> {
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = digits[0..2].parse().ok()?;
    let min: u32 = digits[2..4].parse().ok()?;
    NaiveTime::from_hms_opt(hour, min, 0)
}

/// Locate the `HHMMZ` field, returning its byte offset and time.
fn find_time(line: &str) -> Option<(usize, NaiveTime)> {
    let fixed = line
        .get(TIME_COLUMN..TIME_COLUMN + 5)
        .filter(|field| field.ends_with(['Z', 'z']))
        .and_then(|field| hhmm(&field[..4]));
    if let Some(time) = fixed {
        return Some((TIME_COLUMN, time));
    }

    // Non-standard padding: take the last HHMMZ token.
    let mut found = None;
    let mut offset = 0;
    for token in line.split(' ') {
        if token.len() == 5
            && token.ends_with(['Z', 'z'])
            && let Some(time) = hhmm(&token[..4])
        {
            found = Some((offset, time));
        }
        offset += token.len() + 1;
    }
    found
}

/// Parse a complete cluster spot line.
///
/// # Example
///
/// ```
/// use dx_spot_feed::parser::parse_spot_line;
///
/// let line = "DX de KD0AA:     18100.0  JR1FYS       FT8 LOUD in FL!                2156Z EL98";
/// let spot = parse_spot_line(line).unwrap();
/// assert_eq!(spot.spotter, "KD0AA");
/// assert_eq!(spot.dx_call, "JR1FYS");
/// ```
pub fn parse_spot_line(line: &str) -> ParseResult<SpotLine> {
    let line = line.trim_end();

    let (rest, (spotter, frequency_khz, dx_call)) = parse_head(line.trim_start())
        .map_err(|e| ParseError::InvalidFormat(format!("{:?}", e)))?;

    if frequency_khz <= 0.0 {
        return Err(ParseError::InvalidFrequency(frequency_khz.to_string()));
    }

    let (time_at, time) = find_time(line).ok_or(ParseError::MissingField("time"))?;

    // Everything between the DX call and the time is free-form comment.
    let comment_start = line.len() - rest.len();
    if time_at < comment_start {
        return Err(ParseError::InvalidTime(line[time_at..].to_string()));
    }
    let comment = line[comment_start..time_at].trim().to_string();

    let grid = line[time_at + 5..]
        .split_whitespace()
        .next()
        .filter(|g| (g.len() == 4 || g.len() == 6) && g.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string);

    Ok(SpotLine {
        spotter: spotter.to_string(),
        frequency_khz,
        dx_call: dx_call.to_string(),
        comment,
        time,
        grid,
    })
}

/// Check if a line looks like a spot (quick pre-filter).
///
/// This is a fast check to avoid running the full parser on non-spot lines.
#[inline]
pub fn looks_like_spot(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() > 20
        && (trimmed.starts_with("DX de ")
            || trimmed.starts_with("DX DE ")
            || trimmed.starts_with("dx de "))
}
