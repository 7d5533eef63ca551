use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Image too large: {size} bytes exceeds target capacity of {capacity} bytes")]
    ImageTooLarge { size: usize, capacity: usize },

    #[error("Cube image rejected: {0}")]
    CubePrecondition(String),

    #[error("Wrong platform at offset {offset:#x}: found tag {found:#010x}")]
    WrongPlatform { offset: usize, found: u32 },

    #[error("MAC verification failed for block at offset {offset:#x}")]
    MacMismatch { offset: usize },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid GUID: {0}")]
    InvalidGuid(String),

    #[error("Invalid version record: {0}")]
    InvalidVersion(String),

    #[error("Invalid block index: {0}. Must fit in 9 bits")]
    InvalidBlockIndex(usize),

    #[error("Delta generation failed: {0}")]
    Delta(String),
}

impl SafeError {
    /// Process exit code: 1 for usage errors, 2 for every fatal runtime error
    pub fn exit_code(&self) -> u8 {
        match self {
            SafeError::Usage(_) => 1,
            _ => 2,
        }
    }

    /// True for errors that mean "do not trust this image"
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            SafeError::WrongPlatform { .. } | SafeError::MacMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SafeError>;
