use crate::blockmap::BlockMap;
use crate::error::{Result, SafeError};
use crate::pipeline::sparse::ERASED;

/// Target image being assembled, backed by an erased buffer of the target's
/// full capacity. Every write marks its regions used in the block map.
#[derive(Debug, Clone)]
pub struct StagedImage {
    buffer: Vec<u8>,
    len: usize,
    map: BlockMap,
}

impl StagedImage {
    pub fn new(capacity: usize, region_size: usize) -> Self {
        Self {
            buffer: vec![ERASED; capacity],
            len: 0,
            map: BlockMap::new(capacity, region_size),
        }
    }

    /// Stage `data` at offset zero
    pub fn load(data: &[u8], capacity: usize, region_size: usize) -> Result<Self> {
        let mut staged = Self::new(capacity, region_size);
        staged.patch(0, data)?;
        Ok(staged)
    }

    /// Write `data` at `offset`. Regions are marked used whatever the bytes are.
    pub fn patch(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        if end > self.buffer.len() {
            return Err(SafeError::ImageTooLarge {
                size: end,
                capacity: self.buffer.len(),
            });
        }
        self.buffer[offset..end].copy_from_slice(data);
        self.map.mark_range(offset, data.len());
        self.len = self.len.max(end);
        Ok(())
    }

    /// Staged bytes up to the highest written offset
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// The whole buffer, erased where nothing was written
    pub fn full(&self) -> &[u8] {
        &self.buffer
    }

    pub fn map(&self) -> &BlockMap {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}
