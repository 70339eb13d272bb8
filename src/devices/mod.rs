//! Devices module
//!
//! Contains the INTC and UART models and the constructors the board uses to
//! instantiate and map them.

mod intc;
mod uart;

use std::rc::Rc;

use tracing::debug;

use crate::error::BusError;
use crate::irq::IrqLine;
use crate::memory::AddressSpace;

pub use intc::{Intc, INTC_MMIO_SIZE, INTC_NUM_IRQS};
pub use uart::{ConsoleTransport, Transport, TransportEvent, Uart, TX_FIFO_DEPTH, UART_MMIO_SIZE};

/// Create the interrupt aggregator at `base`, its output wired to `parent`.
///
/// Returns the device and its output line.
pub fn create_intc(
    space: &mut AddressSpace,
    base: u32,
    parent: IrqLine,
) -> Result<(Rc<Intc>, IrqLine), BusError> {
    let intc = Rc::new(Intc::new(parent));
    space.map_device(base, intc.clone())?;
    debug!("intc mapped at {base:#010x}");
    let output = intc.output().clone();
    Ok((intc, output))
}

/// Create a UART at `base` driving `irq`, optionally attached to a transport.
pub fn create_uart(
    space: &mut AddressSpace,
    base: u32,
    irq: IrqLine,
    transport: Option<Box<dyn Transport>>,
) -> Result<Rc<Uart>, BusError> {
    let uart = Rc::new(Uart::new(irq, transport));
    space.map_device(base, uart.clone())?;
    debug!(transport = uart.has_transport(), "uart mapped at {base:#010x}");
    Ok(uart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Bus;

    #[test]
    fn test_uart_wired_through_intc() {
        let mut space = AddressSpace::new();
        let cpu_irq = IrqLine::detached();
        let (intc, output) = create_intc(&mut space, 0x6000_4000, cpu_irq.clone()).unwrap();
        let uart = create_uart(&mut space, 0x7000_6000, intc.input(36), None).unwrap();

        space.write8(0x7000_6000, b'x').unwrap();
        assert!(uart.irq_level());
        assert!(intc.input_level(36));
        assert!(output.level());
        assert!(cpu_irq.level());
    }

    #[test]
    fn test_overlapping_devices_rejected() {
        let mut space = AddressSpace::new();
        let (intc, _) = create_intc(&mut space, 0x6000_4000, IrqLine::detached()).unwrap();
        let err = create_uart(&mut space, 0x6000_43F0, intc.input(1), None).unwrap_err();
        assert_eq!(err, BusError::RegionOverlap { base: 0x6000_43F0, size: UART_MMIO_SIZE });
    }

    #[test]
    fn test_uart_halfword_access() {
        let mut space = AddressSpace::new();
        let uart = create_uart(&mut space, 0x7000_6000, IrqLine::detached(), None).unwrap();

        assert_eq!(space.read16(0x7000_6014).unwrap(), 1 << 5);
        space.write16(0x7000_6000, 0x1241).unwrap();
        assert!(uart.irq_level());
        assert_eq!(
            space.read16(0x7000_601F),
            Err(BusError::UnmappedAccess { addr: 0x7000_601F, size: 2 })
        );
    }
}
