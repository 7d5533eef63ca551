//! Build version sidecar and GUID composition.
//!
//! The sidecar holds one line, `Build %04x autocommit by build server`.
//! Versions are 16 bits. Those at or above [`REAL_VERSION`] are release builds
//! and are bumped on every packaging run; the low byte always stays printable
//! ASCII so the version is readable in a hex dump of the GUID.

use crate::error::{Result, SafeError};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Version used when no sidecar exists
pub const DEVELOPER_VERSION: u16 = 0x0020;
/// Lowest version treated as a release build
pub const REAL_VERSION: u16 = 0x0120;
/// Highest release version that still has a successor
pub const LAST_BUMPABLE_VERSION: u16 = 0xFF7D;
/// Sidecar file name, kept next to the output image
pub const VERSION_FILE: &str = "version.txt";

const PRINTABLE_LOW: u32 = 0x20;
const PRINTABLE_HIGH: u32 = 0x7E;

/// Parse the sidecar record
pub fn parse_version_record(text: &str) -> Result<u16> {
    let line = text.lines().next().unwrap_or("").trim();
    let digits = line
        .strip_prefix("Build ")
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|digits| digits.len() <= 4)
        .ok_or_else(|| SafeError::InvalidVersion(line.to_string()))?;
    u16::from_str_radix(digits, 16).map_err(|_| SafeError::InvalidVersion(line.to_string()))
}

pub fn format_version_record(version: u16) -> String {
    format!("Build {:04x} autocommit by build server\n", version)
}

/// Stored version, or [`DEVELOPER_VERSION`] when the sidecar does not exist
pub fn read_version(path: &Path) -> Result<u16> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_version_record(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DEVELOPER_VERSION),
        Err(e) => Err(e.into()),
    }
}

pub fn write_version(path: &Path, version: u16) -> Result<()> {
    std::fs::write(path, format_version_record(version))?;
    Ok(())
}

/// Increment a release version, keeping the low byte in `0x20..=0x7e`.
/// Overflowing past `0x7e` carries into the high byte. Versions above
/// [`LAST_BUMPABLE_VERSION`] have no 16-bit successor.
pub fn bump_version(version: u16) -> Result<u16> {
    let next = u32::from(version) + 1;
    let low = next & 0xFF;
    let bumped = if low > PRINTABLE_HIGH {
        ((next >> 8) + 1) << 8 | PRINTABLE_LOW
    } else if low < PRINTABLE_LOW {
        (next & !0xFF) | PRINTABLE_LOW
    } else {
        next
    };
    u16::try_from(bumped)
        .map_err(|_| SafeError::InvalidVersion(format!("{:04x} has no successor", version)))
}

/// Version for this run: release versions are bumped, developer versions kept
pub fn next_version(stored: u16) -> Result<u16> {
    if stored >= REAL_VERSION {
        bump_version(stored)
    } else {
        Ok(stored)
    }
}

/// Read, bump and immediately write back the sidecar version
pub fn advance_version(path: &Path) -> Result<u16> {
    let version = next_version(read_version(path)?)?;
    write_version(path, version)?;
    Ok(version)
}

/// GUID: minutes since the Unix epoch in the high half, version in the low half
pub fn compose_guid(timestamp: DateTime<Utc>, version: u16) -> u32 {
    let minutes = (timestamp.timestamp() / 60) as u32 & 0xFFFF;
    minutes << 16 | u32::from(version)
}

/// Parse a GUID given in hex, with or without a `0x` prefix
pub fn parse_guid(text: &str) -> Result<u32> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if digits.is_empty() || digits.len() > 8 {
        return Err(SafeError::InvalidGuid(text.to_string()));
    }
    let padded = format!("{:0>8}", digits);
    let bytes = hex::decode(&padded).map_err(|e| SafeError::InvalidGuid(format!("{}: {}", text, e)))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_format() {
        assert_eq!(
            format_version_record(0x0141),
            "Build 0141 autocommit by build server\n"
        );
        assert_eq!(
            parse_version_record("Build 0141 autocommit by build server\n").unwrap(),
            0x0141
        );
        assert!(parse_version_record("garbage").is_err());
        assert!(parse_version_record("Build zz autocommit").is_err());
        assert!(matches!(
            parse_version_record("Build 10020 autocommit by build server"),
            Err(SafeError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_missing_sidecar_is_developer_build() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(VERSION_FILE);
        assert_eq!(read_version(&path).unwrap(), DEVELOPER_VERSION);
        assert_eq!(advance_version(&path).unwrap(), DEVELOPER_VERSION);
        assert_eq!(read_version(&path).unwrap(), DEVELOPER_VERSION);
    }

    #[test]
    fn test_release_version_advances_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(VERSION_FILE);
        write_version(&path, 0x0141).unwrap();
        assert_eq!(advance_version(&path).unwrap(), 0x0142);
        assert_eq!(advance_version(&path).unwrap(), 0x0143);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Build 0143 autocommit by build server\n"
        );
    }

    #[test]
    fn test_bump_carries() {
        assert_eq!(bump_version(0x017D).unwrap(), 0x017E);
        assert_eq!(bump_version(0x017E).unwrap(), 0x0220);
        assert_eq!(bump_version(0x0100).unwrap(), 0x0120);
        assert_eq!(bump_version(0x01FF).unwrap(), 0x0220);
    }

    #[test]
    fn test_bump_stops_at_top_of_range() {
        assert_eq!(bump_version(LAST_BUMPABLE_VERSION).unwrap(), 0xFF7E);
        assert!(matches!(bump_version(0xFF7E), Err(SafeError::InvalidVersion(_))));
        assert!(bump_version(0xFFFF).is_err());
    }

    #[test]
    fn test_exhausted_sidecar_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(VERSION_FILE);
        write_version(&path, 0xFF7E).unwrap();
        assert!(advance_version(&path).is_err());
        assert_eq!(read_version(&path).unwrap(), 0xFF7E);
    }

    #[test]
    fn test_compose_guid() {
        let ts = Utc.timestamp_opt(60 * 0x1234, 0).unwrap();
        assert_eq!(compose_guid(ts, 0x0141), 0x1234_0141);
    }

    #[test]
    fn test_parse_guid() {
        assert_eq!(parse_guid("deadbeef").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_guid("0x41").unwrap(), 0x41);
        assert!(parse_guid("").is_err());
        assert!(parse_guid("123456789").is_err());
        assert!(parse_guid("xyz").is_err());
    }

    proptest! {
        #[test]
        fn bumped_release_versions_stay_printable(stored in REAL_VERSION..=u16::MAX) {
            match next_version(stored) {
                Ok(next) => {
                    prop_assert!(next > stored);
                    prop_assert!((0x20..=0x7E).contains(&(next & 0xFF)));
                    prop_assert_eq!(parse_version_record(&format_version_record(next)).unwrap(), next);
                }
                Err(_) => prop_assert!(stored > LAST_BUMPABLE_VERSION),
            }
        }
    }
}
