use crate::error::{Result, SafeError};
use crate::header::SAFE_RECORD_SIZE;
use crate::stage::StagedImage;

/// Over-the-air delta generator. The delta format belongs to the OTA updater
/// and is opaque to the packer; it only hands over the staged image and the
/// safe image it just wrote. Generator failures are reported as
/// [`SafeError::Delta`].
pub trait DeltaGenerator {
    fn generate(&self, staged: &StagedImage, safe_image: &[u8]) -> Result<Vec<u8>>;
}

/// Delta against an empty base: the whole safe image
#[derive(Debug, Clone, Copy, Default)]
pub struct FullImageDelta;

impl DeltaGenerator for FullImageDelta {
    fn generate(&self, _staged: &StagedImage, safe_image: &[u8]) -> Result<Vec<u8>> {
        if safe_image.is_empty() || safe_image.len() % SAFE_RECORD_SIZE != 0 {
            return Err(SafeError::Delta(format!(
                "safe image of {} bytes is not a whole number of blocks",
                safe_image.len()
            )));
        }
        Ok(safe_image.to_vec())
    }
}
