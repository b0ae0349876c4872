use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Company identifier Apple advertises under, per the Bluetooth SIG
/// registry. iBeacon frames only ever appear in this entry.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const FRAME_LEN: usize = 23;
const FRAME_PREFIX: [u8; 2] = [0x02, 0x15];

/// 128-bit beacon identifier. Compared as raw bytes, rendered as 32
/// uppercase hex digits grouped 8-4-4-4-12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconUuid([u8; 16]);

impl fmt::Display for BeaconUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a beacon uuid (expected 32 hex digits, hyphens optional): {0:?}")]
pub struct InvalidUuid(String);

impl FromStr for BeaconUuid {
    type Err = InvalidUuid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut digits = s.chars().filter(|c| *c != '-');
        let mut bytes = [0u8; 16];
        for byte in bytes.iter_mut() {
            let hi = digits.next().and_then(|c| c.to_digit(16));
            let lo = digits.next().and_then(|c| c.to_digit(16));
            match (hi, lo) {
                (Some(hi), Some(lo)) => *byte = (hi as u8) << 4 | lo as u8,
                _ => return Err(InvalidUuid(s.to_string())),
            }
        }
        if digits.next().is_some() {
            return Err(InvalidUuid(s.to_string()));
        }
        Ok(BeaconUuid(bytes))
    }
}

/// One decoded iBeacon frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFrame {
    pub uuid: BeaconUuid,
    pub major: u16,
    pub minor: u16,
    pub tx_power: i8,
}

impl BeaconFrame {
    /// Decodes the fixed 23-byte iBeacon layout: `0x02 0x15` prefix,
    /// 16-byte uuid, big-endian major and minor, signed one-meter tx power.
    ///
    /// Returns `None` for anything that is not an iBeacon frame; bytes past
    /// the fixed layout are ignored.
    pub fn parse(payload: &[u8]) -> Option<BeaconFrame> {
        if payload.len() < FRAME_LEN {
            return None;
        }
        if payload[..2] != FRAME_PREFIX {
            return None;
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&payload[2..18]);
        Some(BeaconFrame {
            uuid: BeaconUuid(uuid),
            major: u16::from_be_bytes([payload[18], payload[19]]),
            minor: u16::from_be_bytes([payload[20], payload[21]]),
            tx_power: payload[22] as i8,
        })
    }

    /// Pulls the Apple entry out of an advertisement's manufacturer data and
    /// decodes it. Entries under other company identifiers are ignored.
    pub fn from_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Option<BeaconFrame> {
        BeaconFrame::parse(data.get(&APPLE_COMPANY_ID)?)
    }
}
