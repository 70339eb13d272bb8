//! ARM CPU boundary
//!
//! The instruction interpreter lives outside this crate and drives the core
//! through [`Executor`]. What the board needs from a core is captured by
//! [`CpuCore`]: architectural reset, the program counter, the Thumb state
//! flag and an IRQ input pin. [`ArmCpu`] models that state for the ARMv4T
//! class cores the AVP uses.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::irq::{IrqHandler, IrqLine};
use crate::memory::Bus;
use crate::snapshot::CpuSnapshot;

/// Index of the program counter in the register file
pub const PC: usize = 15;

// CPSR bits
pub const CPSR_T: u32 = 1 << 5; // Thumb state
pub const CPSR_F: u32 = 1 << 6; // FIQ disable
pub const CPSR_I: u32 = 1 << 7; // IRQ disable
const CPSR_MODE_MASK: u32 = 0x1F;

/// Processor modes
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl Mode {
    fn from_bits(bits: u32) -> Option<Mode> {
        match bits & CPSR_MODE_MASK {
            0x10 => Some(Mode::User),
            0x11 => Some(Mode::Fiq),
            0x12 => Some(Mode::Irq),
            0x13 => Some(Mode::Supervisor),
            0x17 => Some(Mode::Abort),
            0x1B => Some(Mode::Undefined),
            0x1F => Some(Mode::System),
            _ => None,
        }
    }
}

/// CPU model the board asks for.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuProfile {
    Arm7tdmi,
    Arm720t,
}

impl CpuProfile {
    pub fn name(&self) -> &'static str {
        match self {
            CpuProfile::Arm7tdmi => "arm7tdmi",
            CpuProfile::Arm720t => "arm720t",
        }
    }

    /// Address the core fetches from out of reset (low vectors).
    pub fn reset_vector(&self) -> u32 {
        0x0000_0000
    }
}

impl FromStr for CpuProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arm7tdmi" => Ok(CpuProfile::Arm7tdmi),
            "arm720t" => Ok(CpuProfile::Arm720t),
            other => Err(Error::DeviceAllocationFailure(format!("CPU definition {other}"))),
        }
    }
}

impl fmt::Display for CpuProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the board composition needs from an execution unit.
pub trait CpuCore {
    /// Return to power-on reset state.
    fn reset(&mut self);

    fn pc(&self) -> u32;

    fn set_pc(&mut self, pc: u32);

    /// Whether the core is executing compressed (Thumb) instructions.
    fn thumb(&self) -> bool;

    fn set_thumb(&mut self, thumb: bool);

    /// Line wired into the core's IRQ input.
    fn irq_input(&self) -> IrqLine;

    /// Current level of the IRQ input.
    fn irq_pending(&self) -> bool;
}

/// Instruction interpreter driving a core against the board's bus.
pub trait Executor<C: CpuCore> {
    /// Execute one instruction.
    fn step(&mut self, cpu: &mut C, bus: &mut dyn Bus) -> Result<()>;
}

/// The IRQ pin
#[derive(Default)]
struct IrqPin {
    pending: Cell<bool>,
}

impl IrqHandler for IrqPin {
    fn set_irq(&self, _n: usize, level: bool) {
        trace!(level, "cpu irq");
        self.pending.set(level);
    }
}

/// CPU state
pub struct ArmCpu {
    profile: CpuProfile,
    /// General purpose registers (r0-r15, r15 = PC)
    pub regs: [u32; 16],
    /// Current program status register
    pub cpsr: u32,
    irq: Rc<IrqPin>,
    irq_line: IrqLine,
}

impl ArmCpu {
    pub fn new(profile: CpuProfile) -> Self {
        let irq = Rc::new(IrqPin::default());
        let irq_line = IrqLine::new(irq.clone(), 0);
        let mut cpu = ArmCpu {
            profile,
            regs: [0u32; 16],
            cpsr: 0,
            irq,
            irq_line,
        };
        cpu.reset();
        cpu
    }

    pub fn profile(&self) -> CpuProfile {
        self.profile
    }

    pub fn read_reg(&self, reg: usize) -> u32 {
        self.regs[reg & 0xF]
    }

    pub fn write_reg(&mut self, reg: usize, value: u32) {
        self.regs[reg & 0xF] = value;
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::from_bits(self.cpsr)
    }

    /// IRQs are taken when the pin is high and CPSR.I is clear.
    pub fn irq_taken(&self) -> bool {
        self.irq.pending.get() && self.cpsr & CPSR_I == 0
    }

    pub(crate) fn save(&self) -> CpuSnapshot {
        CpuSnapshot {
            profile: self.profile,
            regs: self.regs,
            cpsr: self.cpsr,
        }
    }

    pub(crate) fn load(&mut self, snapshot: &CpuSnapshot) {
        self.regs = snapshot.regs;
        self.cpsr = snapshot.cpsr;
    }
}

impl CpuCore for ArmCpu {
    fn reset(&mut self) {
        self.regs = [0u32; 16];
        self.regs[PC] = self.profile.reset_vector();
        // Supervisor mode, interrupts masked, ARM state
        self.cpsr = Mode::Supervisor as u32 | CPSR_I | CPSR_F;
    }

    fn pc(&self) -> u32 {
        self.regs[PC]
    }

    fn set_pc(&mut self, pc: u32) {
        self.regs[PC] = pc;
    }

    fn thumb(&self) -> bool {
        self.cpsr & CPSR_T != 0
    }

    fn set_thumb(&mut self, thumb: bool) {
        if thumb {
            self.cpsr |= CPSR_T;
        } else {
            self.cpsr &= !CPSR_T;
        }
    }

    fn irq_input(&self) -> IrqLine {
        self.irq_line.clone()
    }

    fn irq_pending(&self) -> bool {
        self.irq.pending.get()
    }
}

impl fmt::Debug for ArmCpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArmCpu")
            .field("profile", &self.profile)
            .field("pc", &format_args!("{:#010x}", self.pc()))
            .field("cpsr", &format_args!("{:#010x}", self.cpsr))
            .field("irq_pending", &self.irq_pending())
            .finish()
    }
}
