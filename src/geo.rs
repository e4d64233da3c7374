//! Geographic helpers: coordinates, great-circle distance and Maidenhead locators.
//!
//! All coordinates inside the crate are kept in radians, positive north and
//! east. Degrees only appear at the edges (config, prefix table, display).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius, for converting angular distance to kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Errors converting a Maidenhead locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("Grid locator must be 4 or 6 characters: {0:?}")]
    BadLength(String),

    #[error("Invalid character in grid locator: {0:?}")]
    BadCharacter(String),
}

/// A point on the globe, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Build a point from radians.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a point from degrees.
    pub fn from_degrees(lat_deg: f64, lng_deg: f64) -> Self {
        Self {
            lat: lat_deg.to_radians(),
            lng: lng_deg.to_radians(),
        }
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat.to_degrees()
    }

    pub fn lng_deg(&self) -> f64 {
        self.lng.to_degrees()
    }

    /// Whether both components are finite and within range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= std::f64::consts::FRAC_PI_2 + 1e-9
            && self.lng.abs() <= std::f64::consts::PI + 1e-9
    }

    /// Great-circle angular distance to `other`, in radians.
    pub fn angular_distance(&self, other: &LatLng) -> f64 {
        let dlat = other.lat - self.lat;
        let dlng = other.lng - self.lng;
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.cos() * other.lat.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * a.sqrt().min(1.0).asin()
    }

    /// The 6-character Maidenhead locator containing this point.
    pub fn to_grid(&self) -> String {
        ll_to_grid(self.lat_deg(), self.lng_deg())
    }
}

/// Convert degrees to a 6-character Maidenhead locator (e.g. `DM78ra`).
pub fn ll_to_grid(lat_deg: f64, lng_deg: f64) -> String {
    // Keep the poles and the antimeridian inside the last field.
    let lng = (lng_deg + 180.0).clamp(0.0, 359.999_999);
    let lat = (lat_deg + 90.0).clamp(0.0, 179.999_999);

    let field_lng = (lng / 20.0) as u8;
    let field_lat = (lat / 10.0) as u8;
    let square_lng = ((lng % 20.0) / 2.0) as u8;
    let square_lat = (lat % 10.0) as u8;
    let sub_lng = ((lng % 2.0) * 12.0) as u8;
    let sub_lat = ((lat % 1.0) * 24.0) as u8;

    [
        (b'A' + field_lng) as char,
        (b'A' + field_lat) as char,
        (b'0' + square_lng) as char,
        (b'0' + square_lat) as char,
        (b'a' + sub_lng) as char,
        (b'a' + sub_lat) as char,
    ]
    .iter()
    .collect()
}

/// Convert a 4- or 6-character Maidenhead locator to the center of its square.
pub fn grid_to_ll(grid: &str) -> Result<LatLng, GridError> {
    let bytes: Vec<u8> = grid.trim().bytes().map(|b| b.to_ascii_uppercase()).collect();
    if bytes.len() != 4 && bytes.len() != 6 {
        return Err(GridError::BadLength(grid.to_string()));
    }

    let bad = || GridError::BadCharacter(grid.to_string());
    let field = |b: u8| matches!(b, b'A'..=b'R').then(|| f64::from(b - b'A'));
    let square = |b: u8| b.is_ascii_digit().then(|| f64::from(b - b'0'));
    let sub = |b: u8| matches!(b, b'A'..=b'X').then(|| f64::from(b - b'A'));

    let mut lng = field(bytes[0]).ok_or_else(bad)? * 20.0 + square(bytes[2]).ok_or_else(bad)? * 2.0;
    let mut lat = field(bytes[1]).ok_or_else(bad)? * 10.0 + square(bytes[3]).ok_or_else(bad)?;

    if bytes.len() == 6 {
        lng += sub(bytes[4]).ok_or_else(bad)? * (2.0 / 24.0) + 1.0 / 24.0;
        lat += sub(bytes[5]).ok_or_else(bad)? * (1.0 / 24.0) + 1.0 / 48.0;
    } else {
        lng += 1.0;
        lat += 0.5;
    }

    Ok(LatLng::from_degrees(lat - 90.0, lng - 180.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ll_to_grid_known_station() {
        // W1AW, Newington CT
        assert_eq!(ll_to_grid(41.714775, -72.727260), "FN31pr");
    }

    #[test]
    fn test_ll_to_grid_extremes() {
        assert_eq!(ll_to_grid(90.0, 180.0), "RR99xx");
        assert_eq!(ll_to_grid(-90.0, -180.0), "AA00aa");
    }

    #[test]
    fn test_grid_to_ll_four_chars_is_square_center() {
        let ll = grid_to_ll("FN31").unwrap();
        assert!((ll.lat_deg() - 41.5).abs() < 1e-9);
        assert!((ll.lng_deg() - -73.0).abs() < 1e-9);
    }

    #[test]
    fn test_grid_to_ll_six_chars_round_trips_to_same_grid() {
        let ll = grid_to_ll("DM78ra").unwrap();
        assert_eq!(ll.to_grid(), "DM78ra");
    }

    #[test]
    fn test_grid_to_ll_is_case_insensitive() {
        assert_eq!(grid_to_ll("fn31PR").unwrap(), grid_to_ll("FN31pr").unwrap());
    }

    #[test]
    fn test_grid_to_ll_rejects_bad_input() {
        assert!(matches!(grid_to_ll(""), Err(GridError::BadLength(_))));
        assert!(matches!(grid_to_ll("FN3"), Err(GridError::BadLength(_))));
        assert!(matches!(grid_to_ll("ZZ99"), Err(GridError::BadCharacter(_))));
        assert!(matches!(grid_to_ll("FNAB"), Err(GridError::BadCharacter(_))));
        assert!(matches!(grid_to_ll("FN31zz"), Err(GridError::BadCharacter(_))));
    }

    #[test]
    fn test_angular_distance() {
        let a = LatLng::from_degrees(0.0, 0.0);
        let b = LatLng::from_degrees(0.0, 90.0);
        assert!((a.angular_distance(&b) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(a.angular_distance(&a).abs() < 1e-12);

        let north = LatLng::from_degrees(90.0, 0.0);
        let south = LatLng::from_degrees(-90.0, 0.0);
        assert!((north.angular_distance(&south) - std::f64::consts::PI).abs() < 1e-9);
    }
}
