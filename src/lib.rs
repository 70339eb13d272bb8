//! NVIDIA Tegra AVP board model
//!
//! Composes the AVP coprocessor board: an ARM7-class core, on-chip IRAM,
//! the legacy interrupt controller and the Tegra UARTs. Instruction
//! execution is delegated to an external interpreter through
//! [`cpu::Executor`].
//!
//! ```no_run
//! use avpemu::{Board, BoardConfig, BootImage, ConsoleTransport, Transport};
//!
//! let image = BootImage::from_path("avp.bin")?;
//! let console: Box<dyn Transport> = Box::new(ConsoleTransport::stdout());
//! let board = Board::compose(BoardConfig::avp(), &image, Some(console))?;
//! assert_eq!(board.cpu().regs[15], 0x4000_0000);
//! # Ok::<(), avpemu::Error>(())
//! ```

pub mod config;
pub mod cpu;
pub mod devices;
pub mod error;
pub mod irq;
pub mod loader;
pub mod memory;
pub mod snapshot;
mod system;

pub use config::{BoardConfig, BootInfo, UartConfig};
pub use cpu::{ArmCpu, CpuCore, CpuProfile, Executor};
pub use devices::{ConsoleTransport, Intc, Transport, TransportEvent, Uart};
pub use error::{BusError, Error, Result};
pub use irq::{IrqHandler, IrqLine};
pub use loader::BootImage;
pub use memory::{AddressSpace, Bus, MmioDevice};
pub use snapshot::BoardSnapshot;
pub use system::{Board, BoardState, ResetHandler};
