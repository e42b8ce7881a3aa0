use thiserror::Error;

/// Errors raised while reading an exFAT image.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Fewer bytes were available than the structure requires
    #[error("short read at offset {offset}: needed {needed} bytes, {available} available")]
    ShortRead {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// Boot sector marker is not 0xAA55
    #[error("invalid boot sector signature 0x{found:04X} (expected 0xAA55)")]
    InvalidSignature { found: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
