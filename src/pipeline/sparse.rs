use crate::error::{Result, SafeError};
use crate::pipeline::xxtea::{decrypt_block, encrypt_block, CUBE_BLOCK_SIZE};

/// Erased flash value; bytes equal to this are not stored
pub const ERASED: u8 = 0xFF;

/// Zero bytes at the start of every block. A decrypted block whose header is
/// not all zero marks the end of the image.
const BLOCK_HEADER: usize = 8;
/// Base address (2) + length (1)
const CHUNK_OVERHEAD: usize = 3;
/// Smallest chunk worth starting: overhead plus one payload byte
const MIN_CHUNK: usize = CHUNK_OVERHEAD + 1;
/// Upper bound on chunks in one block, stops a corrupt block from cycling
const MAX_CHUNKS_PER_BLOCK: usize = CUBE_BLOCK_SIZE / MIN_CHUNK;

/// A maximal run of non-erased bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub len: usize,
}

/// Find maximal runs of bytes that are not [`ERASED`]
pub fn find_runs(image: &[u8]) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &byte) in image.iter().enumerate() {
        match (byte != ERASED, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push(Run { start: s, len: i - s });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(Run {
            start: s,
            len: image.len() - s,
        });
    }
    runs
}

struct BlockWriter {
    out: Vec<u8>,
    block: [u8; CUBE_BLOCK_SIZE],
    cursor: usize,
    key: Option<[u32; 4]>,
}

impl BlockWriter {
    fn new(key: Option<[u32; 4]>) -> Self {
        Self {
            out: Vec::new(),
            block: [0u8; CUBE_BLOCK_SIZE],
            cursor: BLOCK_HEADER,
            key,
        }
    }

    fn room(&self) -> usize {
        CUBE_BLOCK_SIZE - self.cursor
    }

    fn push_chunk(&mut self, base: u16, payload: &[u8]) {
        let c = self.cursor;
        self.block[c..c + 2].copy_from_slice(&base.to_be_bytes());
        self.block[c + 2] = payload.len() as u8;
        self.block[c + 3..c + 3 + payload.len()].copy_from_slice(payload);
        self.cursor += CHUNK_OVERHEAD + payload.len();
    }

    fn flush(&mut self) {
        if self.cursor == BLOCK_HEADER {
            return;
        }
        if let Some(key) = &self.key {
            encrypt_block(&mut self.block, key);
        }
        self.out.extend_from_slice(&self.block);
        self.block = [0u8; CUBE_BLOCK_SIZE];
        self.cursor = BLOCK_HEADER;
    }
}

/// Pack the non-erased bytes of a cube image into 256-byte blocks.
///
/// Each chunk is `(base: u16 BE, len: u8, payload)`. Unused space in a block
/// stays zero, which reads back as a zero-length chunk and ends the block.
/// With `key` set every block is XXTEA encrypted.
pub fn encode_cube(image: &[u8], key: Option<&[u32; 4]>) -> Result<Vec<u8>> {
    if image.len() > u16::MAX as usize + 1 {
        return Err(SafeError::ImageTooLarge {
            size: image.len(),
            capacity: u16::MAX as usize + 1,
        });
    }

    let mut writer = BlockWriter::new(key.copied());
    for run in find_runs(image) {
        let mut addr = run.start;
        let end = run.start + run.len;
        while addr < end {
            if writer.room() < MIN_CHUNK {
                writer.flush();
            }
            let len = (end - addr)
                .min(writer.room() - CHUNK_OVERHEAD)
                .min(u8::MAX as usize);
            writer.push_chunk(addr as u16, &image[addr..addr + len]);
            addr += len;
        }
    }
    writer.flush();
    Ok(writer.out)
}

/// Unpack encoded cube blocks into `dest`, which the caller pre-fills with
/// [`ERASED`]. Stops at the first block whose header is not zero, or at the
/// end of `data`. Returns the number of blocks consumed.
pub fn decode_cube(data: &[u8], dest: &mut [u8], key: Option<&[u32; 4]>) -> Result<usize> {
    let mut consumed = 0;
    for (n, raw) in data.chunks(CUBE_BLOCK_SIZE).enumerate() {
        let mut block: [u8; CUBE_BLOCK_SIZE] = raw.try_into().map_err(|_| {
            SafeError::InvalidFormat(format!(
                "Truncated cube block {} ({} bytes)",
                n,
                raw.len()
            ))
        })?;
        if let Some(key) = key {
            decrypt_block(&mut block, key);
        }
        if block[..BLOCK_HEADER].iter().any(|&b| b != 0) {
            break;
        }
        unpack_block(&block, dest, n)?;
        consumed += 1;
    }
    Ok(consumed)
}

fn unpack_block(block: &[u8; CUBE_BLOCK_SIZE], dest: &mut [u8], n: usize) -> Result<()> {
    let at = |p: u8| block[p as usize];
    let mut p = BLOCK_HEADER as u8;
    for _ in 0..MAX_CHUNKS_PER_BLOCK {
        let base = u16::from_be_bytes([at(p), at(p.wrapping_add(1))]) as usize;
        let len = at(p.wrapping_add(2)) as usize;
        if len == 0 {
            return Ok(());
        }
        p = p.wrapping_add(CHUNK_OVERHEAD as u8);
        if base + len > dest.len() {
            return Err(SafeError::InvalidFormat(format!(
                "Cube block {} writes {} bytes at {:#06x}, past end of image",
                n, len, base
            )));
        }
        for slot in &mut dest[base..base + len] {
            *slot = at(p);
            p = p.wrapping_add(1);
        }
    }
    Err(SafeError::InvalidFormat(format!(
        "Cube block {} has an unterminated chunk list",
        n
    )))
}
