//! XXTEA over whole cube blocks.
//!
//! The packer uses the generic word form. The decoder that mirrors the cube
//! bootloader works directly on a 256-byte block with 8-bit byte offsets, so
//! word addressing wraps modulo 256. Both must agree bit for bit.

pub const DELTA: u32 = 0x9e37_79b9;

/// Fixed 128-bit key shared with the cube bootloader
pub const CUBE_KEY: [u32; 4] = [0x3C1F_A2E5, 0x7D04_9B66, 0xA8E3_5C10, 0x1B6F_D487];

/// Encoded cube block size in bytes
pub const CUBE_BLOCK_SIZE: usize = 256;

/// Rounds for a 64-word block: 6 + 52/64
pub const CUBE_ROUNDS: u32 = 6;

/// Standard XXTEA round count for `n` words
pub fn rounds_for(n: usize) -> u32 {
    6 + 52 / n as u32
}

#[inline]
fn mx(sum: u32, y: u32, z: u32, p: usize, e: u32, key: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(key[(p & 3) ^ e as usize] ^ z))
}

/// Encrypt `v` in place. Slices shorter than two words are left untouched.
pub fn encrypt(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let mut sum = 0u32;
    let mut z = v[n - 1];
    for _ in 0..rounds_for(n) {
        sum = sum.wrapping_add(DELTA);
        let e = (sum >> 2) & 3;
        for p in 0..n {
            let y = v[(p + 1) % n];
            v[p] = v[p].wrapping_add(mx(sum, y, z, p, e, key));
            z = v[p];
        }
    }
}

/// Decrypt `v` in place. Slices shorter than two words are left untouched.
pub fn decrypt(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = rounds_for(n);
    let mut sum = rounds.wrapping_mul(DELTA);
    let mut y = v[0];
    for _ in 0..rounds {
        let e = (sum >> 2) & 3;
        for p in (0..n).rev() {
            let z = v[(p + n - 1) % n];
            v[p] = v[p].wrapping_sub(mx(sum, y, z, p, e, key));
            y = v[p];
        }
        sum = sum.wrapping_sub(DELTA);
    }
}

/// Big-endian word at byte offset `p`
#[inline]
fn load(block: &[u8; CUBE_BLOCK_SIZE], p: u8) -> u32 {
    let p = p as usize;
    u32::from_be_bytes([block[p], block[p + 1], block[p + 2], block[p + 3]])
}

#[inline]
fn store(block: &mut [u8; CUBE_BLOCK_SIZE], p: u8, word: u32) {
    let p = p as usize;
    block[p..p + 4].copy_from_slice(&word.to_be_bytes());
}

/// Encrypt one block with its words taken big-endian, as the cube CPU sees them
pub fn encrypt_block(block: &mut [u8; CUBE_BLOCK_SIZE], key: &[u32; 4]) {
    let mut words = [0u32; CUBE_BLOCK_SIZE / 4];
    for (word, chunk) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    encrypt(&mut words, key);
    for (chunk, word) in block.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
}

/// Decrypt one block in place using byte offsets with 8-bit wraparound.
pub fn decrypt_block(block: &mut [u8; CUBE_BLOCK_SIZE], key: &[u32; 4]) {
    let mut sum = CUBE_ROUNDS.wrapping_mul(DELTA);
    let mut y = load(block, 0);
    for _ in 0..CUBE_ROUNDS {
        let e = (sum >> 2) & 3;
        let mut p: u8 = 252;
        loop {
            let z = load(block, p.wrapping_sub(4));
            let k = key[((p >> 2) & 3) as usize ^ e as usize];
            let m = (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
                ^ ((sum ^ y).wrapping_add(k ^ z));
            y = load(block, p).wrapping_sub(m);
            store(block, p, y);
            if p == 0 {
                break;
            }
            p -= 4;
        }
        sum = sum.wrapping_sub(DELTA);
    }
}
