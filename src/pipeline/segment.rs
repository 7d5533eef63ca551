use crate::blockmap::BlockMap;
use crate::error::{Result, SafeError};
use crate::header::{BlockFlags, Platform, SafeHeader, SAFE_BLOCK_SIZE, SAFE_HEADER_SIZE, SAFE_RECORD_SIZE};
use crate::pipeline::cipher::{mac_matches, CipherContext, CipherKey};
use crate::pipeline::sparse::ERASED;

/// Where opened payloads land in the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Honor each header's destination index. Duplicates overwrite, gaps stay erased.
    #[default]
    BlockIndex,
    /// Append payloads in file order and ignore the destination index
    FileOrder,
}

/// One header + payload record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeBlock {
    pub header: SafeHeader,
    pub payload: Vec<u8>,
}

impl SafeBlock {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(SAFE_HEADER_SIZE + self.payload.len());
        record.extend_from_slice(&self.header.to_bytes());
        record.extend_from_slice(&self.payload);
        record
    }
}

/// Encrypt `payload` under the nonce built from the header and store the MAC.
/// Without crypto the payload stays in the clear and the MAC stays zero.
pub fn seal_block(key: &CipherKey, mut header: SafeHeader, payload: &[u8], crypto: bool) -> SafeBlock {
    let mut payload = payload.to_vec();
    payload.resize(SAFE_BLOCK_SIZE, ERASED);
    if crypto {
        let mut ctx = CipherContext::new(key, header.nonce());
        ctx.encrypt(&mut payload);
        header.mac = ctx.finalize();
    } else {
        header.mac = [0; 4];
    }
    SafeBlock { header, payload }
}

/// Check tags, decrypt and verify one record. `offset` is only used for errors.
pub fn open_block(
    key: &CipherKey,
    platform: &Platform,
    record: &[u8],
    offset: usize,
    crypto: bool,
) -> Result<SafeBlock> {
    if record.len() != SAFE_RECORD_SIZE {
        return Err(SafeError::InvalidFormat(format!(
            "Truncated block at offset {:#x}: {} bytes",
            offset,
            record.len()
        )));
    }
    let header = SafeHeader::from_bytes(record)?;
    if !header.matches_platform(platform) {
        return Err(SafeError::WrongPlatform {
            offset,
            found: header.tag_a,
        });
    }

    let mut payload = record[SAFE_HEADER_SIZE..].to_vec();
    if crypto {
        let mut ctx = CipherContext::new(key, header.nonce());
        ctx.decrypt(&mut payload);
        if !mac_matches(&ctx.finalize(), &header.mac) {
            return Err(SafeError::MacMismatch { offset });
        }
    }
    Ok(SafeBlock { header, payload })
}

/// Split the used regions of `image` into sealed blocks.
///
/// Unused regions are skipped entirely. The final block carries both the
/// `last` and `short_last` flags.
pub fn encode_image(
    key: &CipherKey,
    platform: &Platform,
    guid: u32,
    image: &[u8],
    map: &BlockMap,
    crypto: bool,
) -> Result<Vec<SafeBlock>> {
    debug_assert_eq!(map.region_size(), SAFE_BLOCK_SIZE);
    let last = map.last_used();
    let mut blocks = Vec::with_capacity(map.used_count());
    for region in map.used_regions() {
        let mut flags = BlockFlags::new(region)?;
        if Some(region) == last {
            flags.last = true;
            flags.short_last = true;
        }
        let start = (region * SAFE_BLOCK_SIZE).min(image.len());
        let end = (start + SAFE_BLOCK_SIZE).min(image.len());
        let header = SafeHeader::new(platform, guid, flags);
        blocks.push(seal_block(key, header, &image[start..end], crypto));
    }
    Ok(blocks)
}

/// Open every record of a safe image in file order and assemble the payloads.
/// The first record failing tag or MAC checks stops decoding with its offset.
pub fn decode_image(
    key: &CipherKey,
    platform: &Platform,
    data: &[u8],
    placement: Placement,
    crypto: bool,
) -> Result<Vec<u8>> {
    let mut image = Vec::new();
    for (n, record) in data.chunks(SAFE_RECORD_SIZE).enumerate() {
        let offset = n * SAFE_RECORD_SIZE;
        let block = open_block(key, platform, record, offset, crypto)?;
        match placement {
            Placement::FileOrder => image.extend_from_slice(&block.payload),
            Placement::BlockIndex => {
                let start = block.header.flags.index as usize * SAFE_BLOCK_SIZE;
                let end = start + SAFE_BLOCK_SIZE;
                if image.len() < end {
                    image.resize(end, ERASED);
                }
                image[start..end].copy_from_slice(&block.payload);
            }
        }
    }
    Ok(image)
}
