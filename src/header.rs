use crate::error::{Result, SafeError};

/// Safe block payload size in bytes (power of two)
pub const SAFE_BLOCK_SIZE: usize = 2048;
/// Safe block header size in bytes
pub const SAFE_HEADER_SIZE: usize = 32;
/// Size of one header + payload record in a safe image
pub const SAFE_RECORD_SIZE: usize = SAFE_HEADER_SIZE + SAFE_BLOCK_SIZE;

/// Highest destination index the 9-bit block-flags field can carry
pub const MAX_BLOCK_INDEX: usize = 0x1FF;

/// Flashable target description for the main-board (safe block) format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub name: &'static str,
    /// Identifies the hardware platform, first header word
    pub tag_a: u32,
    /// Reserved, second header word
    pub tag_b: u32,
    /// Staging buffer size; larger inputs are rejected
    pub capacity: usize,
    /// Offset in the staged image where the GUID is burned in
    pub guid_offset: usize,
}

impl Platform {
    /// Main control board
    pub const BOARD: Platform = Platform {
        name: "board",
        tag_a: u32::from_le_bytes(*b"K02B"),
        tag_b: 0,
        capacity: 0x2_0000,
        guid_offset: 0xC0,
    };
}

/// Cube image size in bytes
pub const CUBE_IMAGE_SIZE: usize = 0x4000;
/// Cube flash page size; one bit per page in the page bitfield
pub const CUBE_PAGE_SIZE: usize = 0x400;
/// Interrupt vector area owned by the cube bootloader, must stay erased
pub const CUBE_VECTOR_END: usize = 0x80;
/// Start address alignment required by the cube bootloader
pub const CUBE_START_ALIGN: usize = 0x100;
/// `MOV SP,#imm`, the bootloader jumps here and expects a stack setup first
pub const CUBE_STARTUP_SEQUENCE: [u8; 2] = [0x75, 0x81];
pub const CUBE_GUID_OFFSET: usize = 0x3FF8;
pub const CUBE_HWVER_OFFSET: usize = 0x3FFD;
pub const CUBE_PAGE_BITS_OFFSET: usize = 0x3FFE;
pub const CUBE_HWVER_MIN: u8 = 1;
pub const CUBE_HWVER_MAX: u8 = 15;

/// Decoded block-flags word.
///
/// Wire layout (u32, little-endian in the header):
///
/// ```text
/// bits 0..=8   destination block index
/// bit  14      last block
/// bit  15      short-last (legacy size compatibility)
/// ```
///
/// All other bits are written as zero. [`BlockFlags::from_word`] ignores them,
/// [`SafeHeader::from_bytes`] rejects them since they would escape the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags {
    pub index: u16,
    pub last: bool,
    pub short_last: bool,
}

impl BlockFlags {
    const INDEX_MASK: u32 = 0x1FF;
    const LAST_BIT: u32 = 1 << 14;
    const SHORT_LAST_BIT: u32 = 1 << 15;

    pub fn new(index: usize) -> Result<Self> {
        if index > MAX_BLOCK_INDEX {
            return Err(SafeError::InvalidBlockIndex(index));
        }
        Ok(Self {
            index: index as u16,
            last: false,
            short_last: false,
        })
    }

    pub fn to_word(self) -> u32 {
        let mut word = self.index as u32 & Self::INDEX_MASK;
        if self.last {
            word |= Self::LAST_BIT;
        }
        if self.short_last {
            word |= Self::SHORT_LAST_BIT;
        }
        word
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            index: (word & Self::INDEX_MASK) as u16,
            last: word & Self::LAST_BIT != 0,
            short_last: word & Self::SHORT_LAST_BIT != 0,
        }
    }
}

/// 32-byte header in front of every safe block.
/// The first 16 bytes double as the cipher nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeHeader {
    pub tag_a: u32,
    pub tag_b: u32,
    pub guid: u32,
    pub flags: BlockFlags,
    pub mac: [u32; 4],
}

impl SafeHeader {
    pub fn new(platform: &Platform, guid: u32, flags: BlockFlags) -> Self {
        Self {
            tag_a: platform.tag_a,
            tag_b: platform.tag_b,
            guid,
            flags,
            mac: [0; 4],
        }
    }

    /// Nonce words: tag-a, tag-b, GUID, block-flags
    pub fn nonce(&self) -> [u32; 4] {
        [self.tag_a, self.tag_b, self.guid, self.flags.to_word()]
    }

    pub fn matches_platform(&self, platform: &Platform) -> bool {
        self.tag_a == platform.tag_a && self.tag_b == platform.tag_b
    }

    pub fn to_bytes(&self) -> [u8; SAFE_HEADER_SIZE] {
        let mut buf = [0u8; SAFE_HEADER_SIZE];
        let words = [
            self.tag_a,
            self.tag_b,
            self.guid,
            self.flags.to_word(),
            self.mac[0],
            self.mac[1],
            self.mac[2],
            self.mac[3],
        ];
        for (slot, word) in buf.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SAFE_HEADER_SIZE {
            return Err(SafeError::InvalidFormat("Safe header too short".into()));
        }
        let mut words = [0u32; 8];
        for (word, chunk) in words.iter_mut().zip(data[..SAFE_HEADER_SIZE].chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let flags = BlockFlags::from_word(words[3]);
        if flags.to_word() != words[3] {
            return Err(SafeError::InvalidFormat(format!(
                "Reserved block-flags bits set: {:#010x}",
                words[3]
            )));
        }
        Ok(Self {
            tag_a: words[0],
            tag_b: words[1],
            guid: words[2],
            flags,
            mac: [words[4], words[5], words[6], words[7]],
        })
    }
}

/// 16-byte header in front of the encoded cube blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeHeader {
    /// Length in bytes of the encoded block stream that follows
    pub encoded_len: u16,
    /// Populated 1 KiB page bitfield (not inverted)
    pub page_bits: u16,
    /// High byte of the 256-byte aligned start address
    pub start_page: u8,
    pub hw_version: u8,
}

impl CubeHeader {
    pub const MAGIC: &'static [u8; 4] = b"CUB1";
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(Self::MAGIC);
        buf[4..6].copy_from_slice(&self.encoded_len.to_le_bytes());
        buf[6..8].copy_from_slice(&self.page_bits.to_le_bytes());
        buf[8] = self.start_page;
        buf[9] = self.hw_version;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(SafeError::InvalidFormat("Cube header too short".into()));
        }
        if &data[0..4] != Self::MAGIC {
            return Err(SafeError::InvalidFormat("Invalid cube magic bytes".into()));
        }
        Ok(Self {
            encoded_len: u16::from_le_bytes([data[4], data[5]]),
            page_bits: u16::from_le_bytes([data[6], data[7]]),
            start_page: data[8],
            hw_version: data[9],
        })
    }
}
