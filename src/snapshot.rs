//! Board snapshots
//!
//! Captures CPU registers, device state and RAM contents. Serialized with
//! bincode and compressed with zstd.

use serde::{Deserialize, Serialize};

use crate::cpu::CpuProfile;
use crate::error::{Error, Result};

/// Bumped whenever the layout below changes
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Version for compatibility checking
    pub version: u32,
    pub cpu: CpuSnapshot,
    pub intc: IntcSnapshot,
    /// One entry per UART, in board order
    pub uarts: Vec<UartSnapshot>,
    pub ram: Vec<RamSnapshot>,
}

/// CPU state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub profile: CpuProfile,
    /// r0-r15
    pub regs: [u32; 16],
    pub cpsr: u32,
}

/// INTC state snapshot, one word per bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntcSnapshot {
    pub isr: [u32; 4],
    pub fir: [u32; 4],
    pub ier: [u32; 4],
}

/// UART state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartSnapshot {
    /// Bytes not yet taken by the transport
    pub tx_fifo: Vec<u8>,
    pub rx_count: u64,
    pub irq_level: bool,
}

/// Contents of one RAM block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamSnapshot {
    pub base: u32,
    pub data: Vec<u8>,
}

impl BoardSnapshot {
    /// Serialize to bytes (bincode, then zstd)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let serialized = bincode::serialize(self)
            .map_err(|e| Error::Snapshot(format!("serialization error: {e}")))?;
        // Level 0 is default compression
        zstd::stream::encode_all(&serialized[..], 0)
            .map_err(|e| Error::Snapshot(format!("compression error: {e}")))
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let decompressed = zstd::stream::decode_all(data)
            .map_err(|e| Error::Snapshot(format!("decompression error: {e}")))?;
        let snapshot: BoardSnapshot = bincode::deserialize(&decompressed)
            .map_err(|e| Error::Snapshot(format!("deserialization error: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "version mismatch: expected {SNAPSHOT_VERSION}, got {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}
