use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safepack::cli::{pack_image, PackOptions};
use safepack::header::{CUBE_IMAGE_SIZE, SAFE_BLOCK_SIZE, SAFE_HEADER_SIZE, SAFE_RECORD_SIZE};
use safepack::pipeline::xxtea::CUBE_KEY;
use safepack::pipeline::{decode_cube, decode_image, encode_cube, encode_image, Placement};
use safepack::pipeline::{open_block, seal_block, CipherKey};
use safepack::safe::{read_headers, read_safe_file};
use safepack::{BlockFlags, Platform, SafeError, SafeHeader, StagedImage};
use tempfile::tempdir;

const GUID: u32 = 0x2F10_0123;

fn board_image(data: &[u8]) -> Vec<u8> {
    let staged = StagedImage::load(data, Platform::BOARD.capacity, SAFE_BLOCK_SIZE).unwrap();
    encode_image(
        &CipherKey::FACTORY,
        &Platform::BOARD,
        GUID,
        staged.bytes(),
        staged.map(),
        true,
    )
    .unwrap()
    .iter()
    .flat_map(|b| b.to_bytes())
    .collect()
}

#[test]
fn well_formed_block_decodes_to_original_payload() {
    let payload: Vec<u8> = (0..SAFE_BLOCK_SIZE).map(|i| (i ^ (i >> 8)) as u8).collect();
    let header = SafeHeader::new(&Platform::BOARD, GUID, BlockFlags::new(0).unwrap());
    let record = seal_block(&CipherKey::FACTORY, header, &payload, true).to_bytes();
    assert_eq!(record.len(), 2080);

    let opened = open_block(&CipherKey::FACTORY, &Platform::BOARD, &record, 0, true).unwrap();
    assert_eq!(opened.payload, payload);
    assert_eq!(opened.header.guid, GUID);
}

#[test]
fn flipped_mac_word_halts_decoding() {
    let data: Vec<u8> = (0..2 * SAFE_BLOCK_SIZE).map(|i| i as u8).collect();
    let mut encoded = board_image(&data);
    // third MAC word of the first block
    for b in &mut encoded[24..28] {
        *b ^= 0xFF;
    }
    let err = decode_image(
        &CipherKey::FACTORY,
        &Platform::BOARD,
        &encoded,
        Placement::FileOrder,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, SafeError::MacMismatch { offset: 0 }));
    assert!(err.is_authentication());
}

#[test]
fn single_cube_run_survives_roundtrip() {
    let mut image = vec![0xFFu8; CUBE_IMAGE_SIZE];
    image[0x100..0x10A].copy_from_slice(&[0x75, 0x81, 0x30, 0x12, 0x00, 0x00, 0x44, 0xFE, 0x01, 0x80]);

    let encoded = encode_cube(&image, Some(&CUBE_KEY)).unwrap();
    let mut decoded = vec![0xFFu8; CUBE_IMAGE_SIZE];
    decode_cube(&encoded, &mut decoded, Some(&CUBE_KEY)).unwrap();

    assert_eq!(&decoded[0x100..0x10A], &image[0x100..0x10A]);
    assert!(decoded[..0x100].iter().all(|&b| b == 0xFF));
    assert!(decoded[0x10A..].iter().all(|&b| b == 0xFF));
}

#[test]
fn zero_filled_board_image_uses_every_region() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("zeros.bin");
    let output = dir.path().join("zeros.safe");
    let zeros = vec![0u8; 56 * 1024];
    std::fs::write(&input, &zeros).unwrap();

    let staged = StagedImage::load(&zeros, Platform::BOARD.capacity, SAFE_BLOCK_SIZE).unwrap();
    assert_eq!(staged.map().used_count(), 28);
    assert!((0..28).all(|r| staged.map().is_used(r)));
    assert!(!staged.map().is_used(28));

    let options = PackOptions {
        guid: Some(GUID),
        ..Default::default()
    };
    let report = pack_image(&input, &output, &options).unwrap();
    assert_eq!(report.blocks, zeros.len().div_ceil(SAFE_BLOCK_SIZE));
    assert!(report.verify.passed(), "{}", report.verify);

    let headers = read_headers(&read_safe_file(&output).unwrap()).unwrap();
    assert_eq!(headers.len(), 28);
    let last = headers[27].flags;
    assert!(last.last && last.short_last);
    assert_eq!(last.index, 27);
    assert!(headers[..27].iter().all(|h| !h.flags.last && !h.flags.short_last));
}

#[test]
fn blocks_decode_independently_of_their_neighbours() {
    let mut data: Vec<u8> = (0..3 * SAFE_BLOCK_SIZE).map(|i| (i % 253) as u8).collect();
    let first = board_image(&data);

    // a middle record opens on its own
    let middle = &first[SAFE_RECORD_SIZE..2 * SAFE_RECORD_SIZE];
    let opened = open_block(&CipherKey::FACTORY, &Platform::BOARD, middle, 0, true).unwrap();
    assert_eq!(opened.header.flags.index, 1);
    assert_eq!(opened.payload, &data[SAFE_BLOCK_SIZE..2 * SAFE_BLOCK_SIZE]);

    // rewriting the neighbours reseals them but leaves the middle record alone
    data[10] ^= 0xFF;
    data[2 * SAFE_BLOCK_SIZE + 10] ^= 0xFF;
    let second = board_image(&data);
    assert_ne!(first[..SAFE_RECORD_SIZE], second[..SAFE_RECORD_SIZE]);
    assert_ne!(first[2 * SAFE_RECORD_SIZE..], second[2 * SAFE_RECORD_SIZE..]);
    assert_eq!(
        first[SAFE_RECORD_SIZE..2 * SAFE_RECORD_SIZE],
        second[SAFE_RECORD_SIZE..2 * SAFE_RECORD_SIZE]
    );
}

#[test]
fn any_single_bit_flip_is_rejected() {
    let data: Vec<u8> = (0..2 * SAFE_BLOCK_SIZE).map(|i| (i * 31 % 256) as u8).collect();
    let encoded = board_image(&data);
    let mut rng = StdRng::seed_from_u64(0x5AFE);

    for _ in 0..200 {
        let mut tampered = encoded.clone();
        let at = rng.gen_range(0..tampered.len());
        tampered[at] ^= 1 << rng.gen_range(0..8);
        let result = decode_image(
            &CipherKey::FACTORY,
            &Platform::BOARD,
            &tampered,
            Placement::BlockIndex,
            true,
        );
        assert!(result.is_err(), "flip at byte {} went unnoticed", at);
    }
}

#[test]
fn payload_bit_flip_names_the_block() {
    let data = vec![0x33u8; 3 * SAFE_BLOCK_SIZE];
    let mut encoded = board_image(&data);
    let mut rng = StdRng::seed_from_u64(7);
    let block = rng.gen_range(0..3);
    let at = block * SAFE_RECORD_SIZE + SAFE_HEADER_SIZE + rng.gen_range(0..SAFE_BLOCK_SIZE);
    encoded[at] ^= 0x10;

    let err = decode_image(
        &CipherKey::FACTORY,
        &Platform::BOARD,
        &encoded,
        Placement::FileOrder,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, SafeError::MacMismatch { offset } if offset == block * SAFE_RECORD_SIZE));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_board_image_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..6000)) {
        let encoded = board_image(&data);
        prop_assert_eq!(encoded.len() % SAFE_RECORD_SIZE, 0);
        let decoded = decode_image(
            &CipherKey::FACTORY,
            &Platform::BOARD,
            &encoded,
            Placement::BlockIndex,
            true,
        ).unwrap();
        prop_assert_eq!(&decoded[..data.len()], &data[..]);
    }

    #[test]
    fn prop_cube_image_roundtrip(
        runs in proptest::collection::vec((0usize..CUBE_IMAGE_SIZE, 1usize..400, any::<u8>()), 0..12)
    ) {
        let mut image = vec![0xFFu8; CUBE_IMAGE_SIZE];
        for (start, len, fill) in runs {
            let end = (start + len).min(CUBE_IMAGE_SIZE);
            image[start..end].fill(fill);
        }
        let encoded = encode_cube(&image, Some(&CUBE_KEY)).unwrap();
        let mut decoded = vec![0xFFu8; CUBE_IMAGE_SIZE];
        decode_cube(&encoded, &mut decoded, Some(&CUBE_KEY)).unwrap();
        prop_assert_eq!(decoded, image);
    }
}
