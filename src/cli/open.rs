use crate::cube::read_cube_safe;
use crate::error::Result;
use crate::header::{Platform, SAFE_RECORD_SIZE};
use crate::pipeline::cipher::CipherKey;
use crate::pipeline::segment::{decode_image, Placement};
use crate::safe::read_safe_file;
use std::path::Path;

/// Options for the opensafe command
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub cube: bool,
    pub crypto: bool,
    pub placement: Placement,
    pub key: CipherKey,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cube: false,
            crypto: true,
            placement: Placement::default(),
            key: CipherKey::FACTORY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenReport {
    pub blocks: usize,
    pub bytes: usize,
    pub warnings: Vec<String>,
}

/// Decode a safe image back into a flat binary.
/// Any authentication failure aborts before the output is written.
pub fn open_safe(input: &Path, output: &Path, options: &OpenOptions) -> Result<OpenReport> {
    if options.cube {
        let opened = read_cube_safe(input, options.crypto)?;
        std::fs::write(output, &opened.image)?;
        return Ok(OpenReport {
            blocks: opened.blocks,
            bytes: opened.image.len(),
            warnings: opened.warnings,
        });
    }

    let data = read_safe_file(input)?;
    let image = decode_image(
        &options.key,
        &Platform::BOARD,
        &data,
        options.placement,
        options.crypto,
    )?;
    std::fs::write(output, &image)?;
    Ok(OpenReport {
        blocks: data.len() / SAFE_RECORD_SIZE,
        bytes: image.len(),
        warnings: Vec::new(),
    })
}
