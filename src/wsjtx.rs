//! Decoder for WSJT-X style UDP status datagrams.
//!
//! Datagrams are big-endian and start with a fixed header:
//!
//! ```text
//! [magic u32][schema u32][type u32][id: utf8]
//! ```
//!
//! A `utf8` field is a `u32` byte length followed by that many bytes; a length
//! of `0xFFFF_FFFF` denotes a null string and reads as empty. Only message
//! type 1 (Status) is decoded; everything else is skipped.

use thiserror::Error;

/// Leading magic number of every datagram.
pub const MAGIC: u32 = 0xADBC_CBDA;

/// Message type carrying the current frequency and contact.
pub const MSG_STATUS: u32 = 1;

/// Schema version written by [`StatusBuilder`].
pub const SCHEMA: u32 = 2;

/// Errors reading a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("Truncated datagram: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("Invalid UTF-8 in string field at offset {0}")]
    InvalidUtf8(usize),

    #[error("Status frequency is zero")]
    ZeroFrequency,
}

/// Bounds-checked big-endian reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `n` bytes, advancing only on success.
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Read a length-prefixed UTF-8 string. A length of all ones reads as empty.
    pub fn read_len_prefixed_string(&mut self) -> Result<&'a str, WireError> {
        let len = self.read_u32_be()?;
        if len == u32::MAX {
            return Ok("");
        }
        let at = self.pos;
        let bytes = self.take(len as usize)?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8(at))
    }
}

/// The fields of a Status message this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status<'a> {
    pub dial_frequency_hz: u64,
    pub mode: &'a str,
    pub dx_call: &'a str,
    pub de_call: &'a str,
    pub de_grid: &'a str,
    pub dx_grid: &'a str,
}

/// Decode a datagram. Returns `Ok(None)` for valid messages of other types.
pub fn decode_status(datagram: &[u8]) -> Result<Option<Status<'_>>, WireError> {
    let mut cur = ByteCursor::new(datagram);

    let magic = cur.read_u32_be()?;
    if magic != MAGIC {
        return Err(WireError::BadMagic(magic));
    }
    let _schema = cur.read_u32_be()?;
    if cur.read_u32_be()? != MSG_STATUS {
        return Ok(None);
    }
    let _id = cur.read_len_prefixed_string()?;

    let dial_frequency_hz = cur.read_u64_be()?;
    let mode = cur.read_len_prefixed_string()?;
    let dx_call = cur.read_len_prefixed_string()?;
    let _report = cur.read_len_prefixed_string()?;
    let _tx_mode = cur.read_len_prefixed_string()?;
    let _tx_enabled = cur.read_bool()?;
    let _transmitting = cur.read_bool()?;
    let _decoding = cur.read_bool()?;
    let _rx_df = cur.read_u32_be()?;
    let _tx_df = cur.read_u32_be()?;
    let de_call = cur.read_len_prefixed_string()?;
    let de_grid = cur.read_len_prefixed_string()?;
    let dx_grid = cur.read_len_prefixed_string()?;

    if dial_frequency_hz == 0 {
        return Err(WireError::ZeroFrequency);
    }

    Ok(Some(Status {
        dial_frequency_hz,
        mode,
        dx_call,
        de_call,
        de_grid,
        dx_grid,
    }))
}

/// Encodes Status datagrams, for loopback testing and benchmarks.
#[derive(Debug, Clone)]
pub struct StatusBuilder {
    pub id: String,
    pub dial_frequency_hz: u64,
    pub mode: String,
    pub dx_call: String,
    pub de_call: String,
    pub de_grid: String,
    pub dx_grid: String,
}

impl StatusBuilder {
    pub fn new(de_call: &str, de_grid: &str, dx_call: &str, dx_grid: &str, hz: u64) -> Self {
        Self {
            id: "WSJT-X".to_string(),
            dial_frequency_hz: hz,
            mode: "FT8".to_string(),
            dx_call: dx_call.to_string(),
            de_call: de_call.to_string(),
            de_grid: de_grid.to_string(),
            dx_grid: dx_grid.to_string(),
        }
    }

    fn put_str(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u32).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&SCHEMA.to_be_bytes());
        out.extend_from_slice(&MSG_STATUS.to_be_bytes());
        Self::put_str(&mut out, &self.id);
        out.extend_from_slice(&self.dial_frequency_hz.to_be_bytes());
        Self::put_str(&mut out, &self.mode);
        Self::put_str(&mut out, &self.dx_call);
        Self::put_str(&mut out, "-10");
        Self::put_str(&mut out, &self.mode);
        out.extend_from_slice(&[1, 0, 1]);
        out.extend_from_slice(&1500u32.to_be_bytes());
        out.extend_from_slice(&1200u32.to_be_bytes());
        Self::put_str(&mut out, &self.de_call);
        Self::put_str(&mut out, &self.de_grid);
        Self::put_str(&mut out, &self.dx_grid);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_and_advances() {
        let buf = [0, 0, 0, 2, b'h', b'i', 0xFF, 0, 0, 0, 0, 0, 0, 0, 7];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.read_len_prefixed_string().unwrap(), "hi");
        assert!(cur.read_bool().unwrap());
        assert_eq!(cur.read_u64_be().unwrap(), 7);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_cursor_never_reads_past_end() {
        let buf = [0, 0, 0, 9, b'x'];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(
            cur.read_len_prefixed_string(),
            Err(WireError::Truncated {
                offset: 4,
                needed: 9,
                len: 5
            })
        );

        let mut cur = ByteCursor::new(&buf[..3]);
        assert!(cur.read_u32_be().is_err());
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_null_string_reads_empty() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.read_len_prefixed_string().unwrap(), "");
        assert_eq!(cur.read_u32_be().unwrap(), 1);
    }

    #[test]
    fn test_invalid_utf8() {
        let buf = [0, 0, 0, 2, 0xC3, 0x28];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.read_len_prefixed_string(), Err(WireError::InvalidUtf8(4)));
    }

    #[test]
    fn test_decode_status() {
        let datagram = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 14_074_000).build();
        let status = decode_status(&datagram).unwrap().unwrap();

        assert_eq!(status.dial_frequency_hz, 14_074_000);
        assert_eq!(status.mode, "FT8");
        assert_eq!(status.de_call, "K1ABC");
        assert_eq!(status.de_grid, "FN42");
        assert_eq!(status.dx_call, "JA1XYZ");
        assert_eq!(status.dx_grid, "PM95");
    }

    #[test]
    fn test_other_message_types_ignored() {
        let mut datagram = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 14_074_000).build();
        // Heartbeat
        datagram[8..12].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(decode_status(&datagram), Ok(None));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut datagram = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 14_074_000).build();
        datagram[0] ^= 0xFF;
        assert!(matches!(decode_status(&datagram), Err(WireError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_status_rejected() {
        let datagram = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 14_074_000).build();
        for cut in [3, 11, 20, datagram.len() - 1] {
            assert!(
                matches!(decode_status(&datagram[..cut]), Err(WireError::Truncated { .. })),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let datagram = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 0).build();
        assert_eq!(decode_status(&datagram), Err(WireError::ZeroFrequency));
    }
}
