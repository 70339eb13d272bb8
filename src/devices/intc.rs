//! INTC - Tegra interrupt aggregator
//!
//! 128 peripheral inputs are folded onto a single output wired to the CPU
//! IRQ pin. The register window holds four banks of 32 lines each, laid out
//! like the Tegra ICTLR:
//!
//! | offset | name    | access | meaning                          |
//! |--------|---------|--------|----------------------------------|
//! | 0x00   | VIRQ    | R      | `(ISR \| FIR) & IER`             |
//! | 0x10   | ISR     | R      | raw input levels                 |
//! | 0x14   | FIR     | R      | software forced lines            |
//! | 0x18   | FIR_SET | W1S    |                                  |
//! | 0x1C   | FIR_CLR | W1C    |                                  |
//! | 0x20   | IER     | R      | line enables                     |
//! | 0x24   | IER_SET | W1S    |                                  |
//! | 0x28   | IER_CLR | W1C    |                                  |
//!
//! Bank `b` sits at `b * 0x100` and covers inputs `32b..32b+31`. Every line
//! comes out of reset enabled, so until firmware touches the enables the
//! output is the plain OR of the inputs.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::irq::{IrqHandler, IrqLine};
use crate::memory::{AccessSizes, MmioDevice};
use crate::snapshot::IntcSnapshot;

pub const INTC_NUM_IRQS: usize = 128;

/// Size of the register window
pub const INTC_MMIO_SIZE: u32 = 0x400;

const BANKS: usize = INTC_NUM_IRQS / 32;
const BANK_STRIDE: u32 = 0x100;

const ICTLR_VIRQ: u32 = 0x00;
const ICTLR_ISR: u32 = 0x10;
const ICTLR_FIR: u32 = 0x14;
const ICTLR_FIR_SET: u32 = 0x18;
const ICTLR_FIR_CLR: u32 = 0x1C;
const ICTLR_IER: u32 = 0x20;
const ICTLR_IER_SET: u32 = 0x24;
const ICTLR_IER_CLR: u32 = 0x28;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Bank {
    /// Raw input levels
    isr: u32,
    /// Forced interrupts
    fir: u32,
    /// Enabled lines
    ier: u32,
}

impl Bank {
    const RESET: Bank = Bank { isr: 0, fir: 0, ier: u32::MAX };

    fn virq(&self) -> u32 {
        (self.isr | self.fir) & self.ier
    }
}

/// Interrupt aggregator
pub struct Intc {
    banks: RefCell<[Bank; BANKS]>,
    output: IrqLine,
}

impl Intc {
    pub fn new(output: IrqLine) -> Self {
        Intc {
            banks: RefCell::new([Bank::RESET; BANKS]),
            output,
        }
    }

    /// Wiring handle for input `n`.
    pub fn input(self: &Rc<Self>, n: usize) -> IrqLine {
        IrqLine::new(self.clone(), n)
    }

    pub fn output(&self) -> &IrqLine {
        &self.output
    }

    /// Raw level of input `n`
    pub fn input_level(&self, n: usize) -> bool {
        n < INTC_NUM_IRQS && self.banks.borrow()[n / 32].isr & (1 << (n % 32)) != 0
    }

    fn pending(&self) -> bool {
        self.banks.borrow().iter().any(|b| b.virq() != 0)
    }

    /// Recompute the output and drive it if it changed.
    fn update(&self) {
        let level = self.pending();
        if level != self.output.level() {
            trace!(level, "intc output");
            self.output.set(level);
        }
    }

    fn read_bank(&self, bank: usize, reg: u32) -> u32 {
        let b = self.banks.borrow()[bank];
        match reg {
            ICTLR_VIRQ => b.virq(),
            ICTLR_ISR => b.isr,
            ICTLR_FIR => b.fir,
            ICTLR_IER => b.ier,
            _ => 0,
        }
    }

    fn write_bank(&self, bank: usize, reg: u32, value: u32) {
        {
            let mut banks = self.banks.borrow_mut();
            let b = &mut banks[bank];
            match reg {
                ICTLR_FIR_SET => b.fir |= value,
                ICTLR_FIR_CLR => b.fir &= !value,
                ICTLR_IER_SET => b.ier |= value,
                ICTLR_IER_CLR => b.ier &= !value,
                _ => {
                    trace!(bank, reg, value, "write to read-only or reserved intc register");
                    return;
                }
            }
        }
        self.update();
    }

    pub(crate) fn save(&self) -> IntcSnapshot {
        let banks = *self.banks.borrow();
        IntcSnapshot {
            isr: banks.map(|b| b.isr),
            fir: banks.map(|b| b.fir),
            ier: banks.map(|b| b.ier),
        }
    }

    pub(crate) fn load(&self, snapshot: &IntcSnapshot) {
        {
            let mut banks = self.banks.borrow_mut();
            for (i, b) in banks.iter_mut().enumerate() {
                b.isr = snapshot.isr[i];
                b.fir = snapshot.fir[i];
                b.ier = snapshot.ier[i];
            }
        }
        self.update();
    }
}

impl IrqHandler for Intc {
    fn set_irq(&self, n: usize, level: bool) {
        if n >= INTC_NUM_IRQS {
            warn!(n, "intc input out of range");
            return;
        }
        {
            let mut banks = self.banks.borrow_mut();
            let bank = &mut banks[n / 32];
            let bit = 1u32 << (n % 32);
            if level {
                bank.isr |= bit;
            } else {
                bank.isr &= !bit;
            }
        }
        self.update();
    }
}

impl MmioDevice for Intc {
    fn name(&self) -> &'static str {
        "intc"
    }

    fn size(&self) -> u32 {
        INTC_MMIO_SIZE
    }

    fn access_sizes(&self) -> AccessSizes {
        AccessSizes::exactly(4)
    }

    fn read(&self, offset: u32, _size: u8) -> u32 {
        let bank = (offset / BANK_STRIDE) as usize;
        if bank >= BANKS || offset % 4 != 0 {
            return 0;
        }
        self.read_bank(bank, offset % BANK_STRIDE)
    }

    fn write(&self, offset: u32, _size: u8, value: u32) {
        let bank = (offset / BANK_STRIDE) as usize;
        if bank >= BANKS || offset % 4 != 0 {
            return;
        }
        self.write_bank(bank, offset % BANK_STRIDE, value);
    }

    fn reset(&self) {
        {
            let mut banks = self.banks.borrow_mut();
            for b in banks.iter_mut() {
                b.fir = Bank::RESET.fir;
                b.ier = Bank::RESET.ier;
            }
        }
        self.update();
    }
}

impl fmt::Debug for Intc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intc")
            .field("banks", &*self.banks.borrow())
            .field("output", &self.output)
            .finish()
    }
}
