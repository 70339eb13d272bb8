//! Boot image reading
//!
//! Images are raw bytes copied verbatim into IRAM. Gzip and zstd compressed
//! images are unpacked first, detected by their magic numbers.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use tracing::debug;

use crate::config::AVP_IRAM_SIZE;
use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Largest image the unbounded constructors accept: the AVP IRAM.
pub const DEFAULT_IMAGE_LIMIT: usize = AVP_IRAM_SIZE as usize;

/// Firmware image ready to be placed in RAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    data: Vec<u8>,
    path: Option<PathBuf>,
}

impl BootImage {
    /// Read an image from disk, up to [`DEFAULT_IMAGE_LIMIT`] bytes.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_limited(path, DEFAULT_IMAGE_LIMIT)
    }

    /// Read an image from disk. Fails once the (unpacked) image grows past
    /// `limit` bytes, without reading further.
    pub fn from_path_limited(path: impl AsRef<Path>, limit: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::boot_image(path, e))?;
        let data = unpack(BufReader::new(file), limit)
            .map_err(|reason| Error::boot_image(path, reason))?;
        debug!(path = %path.display(), len = data.len(), "boot image read");
        Ok(BootImage {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an image already in memory, up to [`DEFAULT_IMAGE_LIMIT`] bytes.
    pub fn from_bytes(raw: impl AsRef<[u8]>) -> Result<Self> {
        Self::from_bytes_limited(raw, DEFAULT_IMAGE_LIMIT)
    }

    pub fn from_bytes_limited(raw: impl AsRef<[u8]>, limit: usize) -> Result<Self> {
        let data = unpack(raw.as_ref(), limit)
            .map_err(|reason| Error::boot_image("<memory>", reason))?;
        Ok(BootImage { data, path: None })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Name used in diagnostics.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

enum Packing {
    Raw,
    Gzip,
    Zstd,
}

fn packing(head: &[u8]) -> Packing {
    if head.starts_with(&GZIP_MAGIC) {
        Packing::Gzip
    } else if head.starts_with(&ZSTD_MAGIC) {
        Packing::Zstd
    } else {
        Packing::Raw
    }
}

/// Read at most `limit + 1` bytes of unpacked output so an oversized image
/// is caught before it is fully inflated.
fn unpack<R: BufRead>(mut reader: R, limit: usize) -> std::result::Result<Vec<u8>, String> {
    let cap = limit as u64 + 1;
    let head = reader.fill_buf().map_err(|e| format!("read error: {e}"))?;
    let mut out = Vec::new();
    match packing(head) {
        Packing::Gzip => {
            GzDecoder::new(reader)
                .take(cap)
                .read_to_end(&mut out)
                .map_err(|e| format!("gzip decompression error: {e}"))?;
        }
        Packing::Zstd => {
            zstd::stream::Decoder::with_buffer(reader)
                .map_err(|e| format!("zstd decompression error: {e}"))?
                .take(cap)
                .read_to_end(&mut out)
                .map_err(|e| format!("zstd decompression error: {e}"))?;
        }
        Packing::Raw => {
            reader
                .take(cap)
                .read_to_end(&mut out)
                .map_err(|e| format!("read error: {e}"))?;
        }
    }
    if out.len() > limit {
        return Err(format!("image exceeds {limit:#x} bytes"));
    }
    Ok(out)
}
