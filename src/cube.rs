use crate::blockmap::BlockMap;
use crate::error::{Result, SafeError};
use crate::header::{
    CubeHeader, CUBE_GUID_OFFSET, CUBE_HWVER_MAX, CUBE_HWVER_MIN, CUBE_HWVER_OFFSET,
    CUBE_IMAGE_SIZE, CUBE_PAGE_BITS_OFFSET, CUBE_PAGE_SIZE, CUBE_START_ALIGN,
    CUBE_STARTUP_SEQUENCE, CUBE_VECTOR_END,
};
use crate::pipeline::sparse::{decode_cube, encode_cube, ERASED};
use crate::pipeline::xxtea::CUBE_KEY;
use crate::stage::StagedImage;
use std::path::{Path, PathBuf};

/// What the packer learned about a cube image while finalizing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeLayout {
    pub start: usize,
    pub hw_version: u8,
    /// Populated 1 KiB pages, bit N for page N (not inverted)
    pub page_bits: u16,
}

/// Check the bootloader preconditions, burn in the GUID and, last of all,
/// the inverted page bitfield.
pub fn prepare_cube_image(staged: &mut StagedImage, guid: u32) -> Result<CubeLayout> {
    if staged.capacity() != CUBE_IMAGE_SIZE {
        return Err(SafeError::CubePrecondition(format!(
            "staging buffer is {} bytes, expected {}",
            staged.capacity(),
            CUBE_IMAGE_SIZE
        )));
    }

    let image = staged.full();
    if image[..CUBE_VECTOR_END].iter().any(|&b| b != ERASED) {
        return Err(SafeError::CubePrecondition(
            "interrupt vectors are not erased".into(),
        ));
    }

    let start = image
        .iter()
        .position(|&b| b != ERASED)
        .ok_or_else(|| SafeError::CubePrecondition("image is empty".into()))?;
    if start % CUBE_START_ALIGN != 0 {
        return Err(SafeError::CubePrecondition(format!(
            "start address {:#06x} is not {}-byte aligned",
            start, CUBE_START_ALIGN
        )));
    }
    if !image[start..].starts_with(&CUBE_STARTUP_SEQUENCE) {
        return Err(SafeError::CubePrecondition(format!(
            "start address {:#06x} does not begin with the startup sequence",
            start
        )));
    }

    let hw_version = image[CUBE_HWVER_OFFSET];
    if !(CUBE_HWVER_MIN..=CUBE_HWVER_MAX).contains(&hw_version) {
        return Err(SafeError::CubePrecondition(format!(
            "hardware version {} out of range {}..={}",
            hw_version, CUBE_HWVER_MIN, CUBE_HWVER_MAX
        )));
    }

    staged.patch(CUBE_GUID_OFFSET, &guid.to_le_bytes())?;

    // The page bitfield lives in the last page, so that page always counts as populated
    let mut pages = BlockMap::from_content(staged.full(), CUBE_PAGE_SIZE, |b| b != ERASED);
    pages.mark_range(CUBE_PAGE_BITS_OFFSET, 2);
    let page_bits = pages.page_bits();
    staged.patch(CUBE_PAGE_BITS_OFFSET, &(!page_bits).to_le_bytes())?;

    Ok(CubeLayout {
        start,
        hw_version,
        page_bits,
    })
}

/// `out.safe` becomes `out-p1-p2-p15-hw3.safe`
pub fn cube_output_path(output: &Path, layout: &CubeLayout) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = stem;
    for page in 0..16 {
        if layout.page_bits & (1 << page) != 0 {
            name.push_str(&format!("-p{}", page));
        }
    }
    name.push_str(&format!("-hw{}", layout.hw_version));
    if let Some(ext) = output.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    output.with_file_name(name)
}

/// Header plus encoded blocks, ready to write
pub fn build_cube_safe(image: &[u8], layout: &CubeLayout, crypto: bool) -> Result<Vec<u8>> {
    let key = crypto.then_some(&CUBE_KEY);
    let blocks = encode_cube(image, key)?;
    let encoded_len = u16::try_from(blocks.len()).map_err(|_| SafeError::ImageTooLarge {
        size: blocks.len(),
        capacity: u16::MAX as usize,
    })?;
    let header = CubeHeader {
        encoded_len,
        page_bits: layout.page_bits,
        start_page: (layout.start >> 8) as u8,
        hw_version: layout.hw_version,
    };
    let mut out = Vec::with_capacity(CubeHeader::SIZE + blocks.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&blocks);
    Ok(out)
}

pub fn write_cube_safe(path: &Path, image: &[u8], layout: &CubeLayout, crypto: bool) -> Result<usize> {
    let data = build_cube_safe(image, layout, crypto)?;
    std::fs::write(path, &data)?;
    Ok(data.len())
}

/// A cube image decoded from its safe file
#[derive(Debug, Clone)]
pub struct OpenedCube {
    pub header: CubeHeader,
    pub image: Vec<u8>,
    pub blocks: usize,
    pub warnings: Vec<String>,
}

/// Decode a cube safe file into a 16 KiB erased image.
/// A declared length that disagrees with the data present is only a warning.
pub fn open_cube_safe(data: &[u8], crypto: bool) -> Result<OpenedCube> {
    let header = CubeHeader::from_bytes(data)?;
    let body = &data[CubeHeader::SIZE..];

    let mut warnings = Vec::new();
    if header.encoded_len as usize != body.len() {
        warnings.push(format!(
            "cube header declares {} encoded bytes, file holds {}",
            header.encoded_len,
            body.len()
        ));
    }

    let mut image = vec![ERASED; CUBE_IMAGE_SIZE];
    let key = crypto.then_some(&CUBE_KEY);
    let blocks = decode_cube(body, &mut image, key)?;
    Ok(OpenedCube {
        header,
        image,
        blocks,
        warnings,
    })
}

pub fn read_cube_safe(path: &Path, crypto: bool) -> Result<OpenedCube> {
    let data = std::fs::read(path)?;
    open_cube_safe(&data, crypto)
}
