use crate::cli::verify::{verify_board, verify_cube, VerifyReport};
use crate::cube::{cube_output_path, prepare_cube_image, write_cube_safe};
use crate::delta::{DeltaGenerator, FullImageDelta};
use crate::error::Result;
use crate::header::{Platform, CUBE_IMAGE_SIZE, CUBE_PAGE_SIZE, SAFE_BLOCK_SIZE};
use crate::pipeline::cipher::CipherKey;
use crate::pipeline::segment::encode_image;
use crate::pipeline::xxtea::CUBE_BLOCK_SIZE;
use crate::safe::{write_safe_file, BlockOrder};
use crate::stage::StagedImage;
use crate::version::{advance_version, compose_guid, VERSION_FILE};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// What kind of image to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Main board safe image
    #[default]
    Board,
    /// Main board safe image plus an OTA delta next to it
    Ota,
    /// Cube accessory image
    Cube,
}

/// Options for the pack command
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub target: Target,
    pub crypto: bool,
    /// Write board blocks forward, then again in reverse
    pub scramble: bool,
    /// Explicit GUID; skips the version sidecar entirely
    pub guid: Option<u32>,
    /// Version sidecar, defaults to `version.txt` next to the output
    pub version_file: Option<PathBuf>,
    pub key: CipherKey,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            target: Target::default(),
            crypto: true,
            scramble: false,
            guid: None,
            version_file: None,
            key: CipherKey::FACTORY,
        }
    }
}

/// Result of a packaging run
#[derive(Debug, Clone)]
pub struct PackReport {
    /// Image actually written (cube names gain page and hardware suffixes)
    pub output: PathBuf,
    pub ota: Option<PathBuf>,
    pub guid: u32,
    /// Version taken from the sidecar; `None` when the GUID was given explicitly
    pub version: Option<u16>,
    /// Blocks written to the output file
    pub blocks: usize,
    pub staged_bytes: usize,
    pub verify: VerifyReport,
}

fn version_path(output: &Path, options: &PackOptions) -> PathBuf {
    options.version_file.clone().unwrap_or_else(|| {
        output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(VERSION_FILE)
    })
}

/// Package `input` into a safe image at `output`
pub fn pack_image(input: &Path, output: &Path, options: &PackOptions) -> Result<PackReport> {
    pack_image_with(input, output, options, &FullImageDelta)
}

/// Package `input`, using `delta` for the OTA file
pub fn pack_image_with(
    input: &Path,
    output: &Path,
    options: &PackOptions,
    delta: &dyn DeltaGenerator,
) -> Result<PackReport> {
    let data = std::fs::read(input)?;
    let mut staged = match options.target {
        Target::Board | Target::Ota => {
            StagedImage::load(&data, Platform::BOARD.capacity, SAFE_BLOCK_SIZE)?
        }
        Target::Cube => StagedImage::load(&data, CUBE_IMAGE_SIZE, CUBE_PAGE_SIZE)?,
    };

    let (version, guid) = match options.guid {
        Some(guid) => (None, guid),
        None => {
            let version = advance_version(&version_path(output, options))?;
            (Some(version), compose_guid(Utc::now(), version))
        }
    };

    match options.target {
        Target::Board | Target::Ota => {
            let platform = Platform::BOARD;
            staged.patch(platform.guid_offset, &guid.to_le_bytes())?;

            let blocks = encode_image(
                &options.key,
                &platform,
                guid,
                staged.bytes(),
                staged.map(),
                options.crypto,
            )?;
            let order = if options.scramble {
                BlockOrder::Scramble
            } else {
                BlockOrder::Forward
            };
            let written = write_safe_file(output, &blocks, order)?;

            let ota = if options.target == Target::Ota {
                let ota_path = output.with_extension("ota");
                let safe_image = std::fs::read(output)?;
                std::fs::write(&ota_path, delta.generate(&staged, &safe_image)?)?;
                Some(ota_path)
            } else {
                None
            };

            let verify = verify_board(output, &options.key, &platform, staged.bytes(), options.crypto);
            Ok(PackReport {
                output: output.to_path_buf(),
                ota,
                guid,
                version,
                blocks: written,
                staged_bytes: staged.len(),
                verify,
            })
        }
        Target::Cube => {
            let layout = prepare_cube_image(&mut staged, guid)?;
            let path = cube_output_path(output, &layout);
            let size = write_cube_safe(&path, staged.full(), &layout, options.crypto)?;

            let verify = verify_cube(&path, staged.full(), options.crypto);
            Ok(PackReport {
                output: path,
                ota: None,
                guid,
                version,
                blocks: size / CUBE_BLOCK_SIZE,
                staged_bytes: staged.len(),
                verify,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SafeError;
    use crate::header::{SafeHeader, CUBE_HWVER_OFFSET, SAFE_RECORD_SIZE};
    use crate::safe::{read_headers, read_safe_file};
    use crate::version::{read_version, write_version};
    use tempfile::tempdir;

    #[test]
    fn test_pack_board_image() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("body.bin");
        let output = dir.path().join("body.safe");
        let firmware: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &firmware).unwrap();

        let report = pack_image(&input, &output, &PackOptions::default()).unwrap();
        assert_eq!(report.blocks, 5);
        assert!(report.verify.passed(), "{}", report.verify);
        assert_eq!(report.version, Some(crate::version::DEVELOPER_VERSION));
        assert_eq!(report.guid & 0xFFFF, u32::from(crate::version::DEVELOPER_VERSION));

        let data = read_safe_file(&output).unwrap();
        assert_eq!(data.len(), 5 * SAFE_RECORD_SIZE);
        let headers = read_headers(&data).unwrap();
        assert!(headers.iter().all(|h| h.guid == report.guid));
        assert!(headers[4].flags.last);
    }

    #[test]
    fn test_guid_is_burned_into_image() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("body.bin");
        let output = dir.path().join("body.safe");
        std::fs::write(&input, vec![0u8; 4096]).unwrap();

        let options = PackOptions {
            guid: Some(0xAABB_CCDD),
            crypto: false,
            ..Default::default()
        };
        let report = pack_image(&input, &output, &options).unwrap();
        assert_eq!(report.version, None);
        assert!(!dir.path().join(VERSION_FILE).exists());

        let data = read_safe_file(&output).unwrap();
        let at = 32 + Platform::BOARD.guid_offset;
        assert_eq!(&data[at..at + 4], &0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(SafeHeader::from_bytes(&data).unwrap().guid, 0xAABB_CCDD);
    }

    #[test]
    fn test_release_version_bumped_each_run() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("body.bin");
        let output = dir.path().join("body.safe");
        let sidecar = dir.path().join(VERSION_FILE);
        std::fs::write(&input, [1u8; 64]).unwrap();
        write_version(&sidecar, 0x0150).unwrap();

        let first = pack_image(&input, &output, &PackOptions::default()).unwrap();
        let second = pack_image(&input, &output, &PackOptions::default()).unwrap();
        assert_eq!(first.version, Some(0x0151));
        assert_eq!(second.version, Some(0x0152));
        assert_eq!(read_version(&sidecar).unwrap(), 0x0152);
        assert_ne!(first.guid, second.guid);
    }

    #[test]
    fn test_scramble_still_verifies() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("body.bin");
        let output = dir.path().join("body.safe");
        std::fs::write(&input, vec![0x5Au8; 3 * SAFE_BLOCK_SIZE]).unwrap();

        let options = PackOptions {
            scramble: true,
            guid: Some(1),
            ..Default::default()
        };
        let report = pack_image(&input, &output, &options).unwrap();
        assert_eq!(report.blocks, 6);
        assert!(report.verify.passed(), "{}", report.verify);
    }

    #[test]
    fn test_ota_writes_delta() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("body.bin");
        let output = dir.path().join("body.safe");
        std::fs::write(&input, [7u8; 100]).unwrap();

        let options = PackOptions {
            target: Target::Ota,
            guid: Some(2),
            ..Default::default()
        };
        let report = pack_image(&input, &output, &options).unwrap();
        let ota = report.ota.unwrap();
        assert_eq!(ota, dir.path().join("body.ota"));
        assert_eq!(std::fs::read(&ota).unwrap(), std::fs::read(&output).unwrap());
    }

    #[test]
    fn test_oversized_input_is_fatal() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("huge.bin");
        let output = dir.path().join("huge.safe");
        std::fs::write(&input, vec![0u8; Platform::BOARD.capacity + 1]).unwrap();

        let err = pack_image(&input, &output, &PackOptions::default()).unwrap_err();
        assert!(matches!(err, SafeError::ImageTooLarge { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = tempdir().unwrap();
        let err = pack_image(
            &dir.path().join("missing.bin"),
            &dir.path().join("out.safe"),
            &PackOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SafeError::Io(_)));
    }

    #[test]
    fn test_pack_cube_image() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cube.bin");
        let output = dir.path().join("cube.safe");
        let mut firmware = vec![0xFFu8; CUBE_IMAGE_SIZE];
        firmware[0x200..0x204].copy_from_slice(&[0x75, 0x81, 0x60, 0x00]);
        firmware[0x800..0x810].fill(0x11);
        firmware[CUBE_HWVER_OFFSET] = 2;
        std::fs::write(&input, &firmware).unwrap();

        let options = PackOptions {
            target: Target::Cube,
            guid: Some(0x0102_0304),
            ..Default::default()
        };
        let report = pack_image(&input, &output, &options).unwrap();
        assert_eq!(report.output, dir.path().join("cube-p0-p2-p15-hw2.safe"));
        assert!(report.output.exists());
        assert!(report.verify.passed(), "{}", report.verify);
    }

    #[test]
    fn test_cube_precondition_is_fatal() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cube.bin");
        std::fs::write(&input, [0x02u8, 0x01, 0x00]).unwrap();

        let options = PackOptions {
            target: Target::Cube,
            guid: Some(1),
            ..Default::default()
        };
        let err = pack_image(&input, &dir.path().join("cube.safe"), &options).unwrap_err();
        assert!(matches!(err, SafeError::CubePrecondition(_)));
    }
}
