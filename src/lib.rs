//! Safepack - firmware image packer
//!
//! Produces and opens the tamper-evident, encrypted images flashed onto the
//! robot's main board and its cube accessories, and doubles as the reference
//! decoder for the bootloaders that accept them.
//!
//! ## Formats
//!
//! ```text
//! Board:  [header 32][payload 2048] [header 32][payload 2048] ...
//! Cube:   [cube header 16][XXTEA block 256] [XXTEA block 256] ...
//! ```
//!
//! - **Board**: each used 2 KiB region of the image becomes one block. The
//!   first 16 header bytes (platform tags, GUID, block flags) are the nonce of
//!   a 160-bit ARX stream cipher whose MAC fills the rest of the header.
//! - **Cube**: only the non-erased (not `0xFF`) runs of the 16 KiB image are
//!   packed as `(base, length, bytes)` chunks into XXTEA encrypted blocks.
//!
//! Every packaging run decodes what it just wrote and diffs it against the
//! staged image.
//!
//! ## Example
//!
//! ```no_run
//! use safepack::cli::{open_safe, pack_image, OpenOptions, PackOptions};
//! use std::path::Path;
//!
//! let report = pack_image(
//!     Path::new("body.bin"),
//!     Path::new("body.safe"),
//!     &PackOptions::default(),
//! ).unwrap();
//! println!("{}", report.verify);
//!
//! open_safe(
//!     Path::new("body.safe"),
//!     Path::new("body.out"),
//!     &OpenOptions::default(),
//! ).unwrap();
//! ```

pub mod blockmap;
pub mod cli;
pub mod cube;
pub mod delta;
pub mod error;
pub mod header;
pub mod pipeline;
pub mod safe;
pub mod stage;
pub mod version;

pub use blockmap::BlockMap;
pub use error::{Result, SafeError};
pub use header::{BlockFlags, CubeHeader, Platform, SafeHeader};
pub use stage::StagedImage;
