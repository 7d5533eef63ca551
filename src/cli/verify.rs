use crate::cube::read_cube_safe;
use crate::header::Platform;
use crate::pipeline::cipher::CipherKey;
use crate::pipeline::segment::{decode_image, Placement};
use crate::safe::read_safe_file;
use std::fmt;
use std::path::Path;

/// Outcome of decoding a freshly written image and diffing it against the
/// staged image. Informational only: it never changes the packer's result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyReport {
    pub compared: usize,
    pub mismatches: usize,
    pub first_mismatch: Option<usize>,
    /// Set when the image could not be decoded at all
    pub error: Option<String>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.mismatches == 0
    }

    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "Verify FAILED: {}", error);
        }
        match self.first_mismatch {
            None => write!(f, "Verify OK: {} bytes match", self.compared),
            Some(first) => write!(
                f,
                "Verify FAILED: {} of {} bytes differ, first at {:#x}",
                self.mismatches, self.compared, first
            ),
        }
    }
}

/// Byte-for-byte diff of `decoded` against `expected`.
/// Bytes missing from `decoded` count as mismatches; extra bytes are ignored.
pub fn diff_images(expected: &[u8], decoded: &[u8]) -> VerifyReport {
    let mut report = VerifyReport {
        compared: expected.len(),
        ..Default::default()
    };
    for (i, &want) in expected.iter().enumerate() {
        if decoded.get(i) != Some(&want) {
            report.mismatches += 1;
            report.first_mismatch.get_or_insert(i);
        }
    }
    report
}

/// Decode a board safe image from disk and diff it against the staged bytes
pub fn verify_board(
    path: &Path,
    key: &CipherKey,
    platform: &Platform,
    expected: &[u8],
    crypto: bool,
) -> VerifyReport {
    let decoded = read_safe_file(path)
        .and_then(|data| decode_image(key, platform, &data, Placement::BlockIndex, crypto));
    match decoded {
        Ok(image) => diff_images(expected, &image),
        Err(e) => VerifyReport::failed(e.to_string()),
    }
}

/// Decode a cube safe file from disk and diff it against the staged image
pub fn verify_cube(path: &Path, expected: &[u8], crypto: bool) -> VerifyReport {
    match read_cube_safe(path, crypto) {
        Ok(opened) => diff_images(expected, &opened.image),
        Err(e) => VerifyReport::failed(e.to_string()),
    }
}
