//! Decoding of the immerSUN request datagram.
//!
//! The bridge sends a fixed 56 byte frame. Only a handful of fields are
//! understood; everything else is opaque and is never touched.
//!
//! ```text
//! offset  len  type        field
//!   28     2   i16 LE      exporting power (W, negative when importing)
//!   36     4   i32 LE      device serial number
//!   52     2   i16 LE      generating power (W)
//!   54     2   i16 LE      diverting power (W)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nominal length of a request frame.
pub const FRAME_LEN: usize = 56;

pub const EXPORTING_OFFSET: usize = 28;
pub const SERIAL_OFFSET: usize = 36;
pub const GENERATING_OFFSET: usize = 52;
pub const DIVERTING_OFFSET: usize = 54;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: {len} bytes, need at least {FRAME_LEN}")]
    Truncated { len: usize },
}

/// The values carried by one request frame plus the quantities derived
/// from them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedReading {
    pub serial_number: i32,
    pub exporting_power: i16,
    pub generating_power: i16,
    pub diverting_power: i16,
    pub consuming_power: i32,
    pub importing_power: i32,
}

impl DecodedReading {
    /// Builds a reading from the raw wire fields, deriving consumption and
    /// import.
    pub fn from_raw(serial_number: i32, exporting: i16, generating: i16, diverting: i16) -> Self {
        let exporting_wide = i32::from(exporting);
        let consuming_power =
            -(exporting_wide - i32::from(generating) + i32::from(diverting));

        return DecodedReading {
            serial_number,
            exporting_power: exporting,
            generating_power: generating,
            diverting_power: diverting,
            consuming_power,
            importing_power: -exporting_wide,
        };
    }

    /// Topic suffixes and values published for this reading, in publish
    /// order.
    pub fn topics(&self) -> [(String, i32); 4] {
        let serial = self.serial_number;

        [
            (
                format!("{serial}/generating/power"),
                i32::from(self.generating_power),
            ),
            (format!("{serial}/consuming/power"), self.consuming_power),
            (
                format!("{serial}/diverting/power"),
                i32::from(self.diverting_power),
            ),
            (format!("{serial}/importing/power"), self.importing_power),
        ]
    }
}

fn read_i16(frame: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([frame[offset], frame[offset + 1]])
}

fn read_i32(frame: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

/// Decodes the known fields of a request frame.
///
/// Frames longer than [`FRAME_LEN`] are accepted and the trailing bytes
/// ignored; shorter frames fail without reading anything.
pub fn decode(frame: &[u8]) -> Result<DecodedReading, DecodeError> {
    if frame.len() < FRAME_LEN {
        return Err(DecodeError::Truncated { len: frame.len() });
    }

    let exporting = read_i16(frame, EXPORTING_OFFSET);
    let serial = read_i32(frame, SERIAL_OFFSET);
    let generating = read_i16(frame, GENERATING_OFFSET);
    let diverting = read_i16(frame, DIVERTING_OFFSET);

    return Ok(DecodedReading::from_raw(
        serial, exporting, generating, diverting,
    ));
}
