use crate::error::{Result, SafeError};
use crate::header::{SafeHeader, SAFE_RECORD_SIZE};
use crate::pipeline::segment::SafeBlock;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Order in which blocks are written to a safe image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockOrder {
    #[default]
    Forward,
    /// Every block forward, then every block again in reverse.
    /// Exercises a bootloader's handling of reordered and repeated blocks.
    Scramble,
}

/// Blocks in the order they go to disk
pub fn ordered_blocks(blocks: &[SafeBlock], order: BlockOrder) -> Vec<&SafeBlock> {
    match order {
        BlockOrder::Forward => blocks.iter().collect(),
        BlockOrder::Scramble => blocks.iter().chain(blocks.iter().rev()).collect(),
    }
}

/// Write a safe image. There is no file header: block count is implied by length.
/// Returns the number of records written.
pub fn write_safe_file(path: &Path, blocks: &[SafeBlock], order: BlockOrder) -> Result<usize> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let ordered = ordered_blocks(blocks, order);
    for block in &ordered {
        writer.write_all(&block.header.to_bytes())?;
        writer.write_all(&block.payload)?;
    }

    writer.flush()?;
    Ok(ordered.len())
}

/// Read a safe image, rejecting files that are not a whole number of records
pub fn read_safe_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    if data.len() % SAFE_RECORD_SIZE != 0 {
        return Err(SafeError::InvalidFormat(format!(
            "Safe image length {} is not a multiple of {}",
            data.len(),
            SAFE_RECORD_SIZE
        )));
    }
    Ok(data)
}

/// Headers of every record, without decrypting anything
pub fn read_headers(data: &[u8]) -> Result<Vec<SafeHeader>> {
    data.chunks(SAFE_RECORD_SIZE)
        .map(SafeHeader::from_bytes)
        .collect()
}
