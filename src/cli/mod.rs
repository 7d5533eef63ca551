pub mod open;
pub mod pack;
pub mod verify;

pub use open::*;
pub use pack::*;
pub use verify::*;
