//! Error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by MMIO dispatch.
///
/// These are configuration or firmware programming errors; the bus never
/// coerces a bad access into a quiet success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("invalid {size}-byte access at {addr:#010x}")]
    InvalidAccessSize { addr: u32, size: u8 },

    #[error("unmapped {size}-byte access at {addr:#010x}")]
    UnmappedAccess { addr: u32, size: u8 },

    #[error("region {base:#010x}+{size:#x} overlaps an existing mapping")]
    RegionOverlap { base: u32, size: u32 },
}

/// Board level errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to load boot image {}: {reason}", path.display())]
    BootImageLoadFailure { path: PathBuf, reason: String },

    #[error("unable to allocate {0}")]
    DeviceAllocationFailure(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl Error {
    pub(crate) fn boot_image(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::BootImageLoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
