pub mod cipher;
pub mod segment;
pub mod sparse;
pub mod xxtea;

pub use cipher::{CipherContext, CipherKey};
pub use segment::{decode_image, encode_image, open_block, seal_block, Placement, SafeBlock};
pub use sparse::{decode_cube, encode_cube, find_runs, ERASED};
