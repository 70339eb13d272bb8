//! Tegra UART
//!
//! 16550-style register file with a 4-byte register stride. Only the
//! transmit path is modelled through registers: THR queues a byte into an
//! 8-entry TX FIFO that drains into the attached transport, and LSR reports
//! whether the FIFO has room. Received bytes are accepted from the transport
//! but not exposed to firmware.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

use tracing::{debug, trace, warn};

use crate::irq::IrqLine;
use crate::memory::{AccessSizes, MmioDevice};
use crate::snapshot::UartSnapshot;

// UART registers (offset from base)
const UART_THR: u32 = 0x00; // Transmit Holding Register (write)
const UART_LSR: u32 = 0x14; // Line Status Register (read)

// Line Status Register bits
const LSR_THRE: u32 = 1 << 5; // Transmit holding register empty

/// Size of the register window
pub const UART_MMIO_SIZE: u32 = 0x20;

/// Depth of the transmit FIFO
pub const TX_FIFO_DEPTH: usize = 8;

/// Out-of-band notifications from the character backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Break,
}

/// Byte sink a UART transmits into (stdio, socket, pty...).
pub trait Transport {
    /// Write as much of `data` as the backend accepts right now and return
    /// how many bytes were taken.
    fn write(&mut self, data: &[u8]) -> usize;
}

/// The host's default serial console.
pub struct ConsoleTransport {
    out: Box<dyn Write>,
}

impl ConsoleTransport {
    pub fn new(out: Box<dyn Write>) -> Self {
        ConsoleTransport { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Transport for ConsoleTransport {
    fn write(&mut self, data: &[u8]) -> usize {
        let written = match self.out.write(data) {
            Ok(n) => n,
            Err(err) => {
                warn!("console write failed: {err}");
                return 0;
            }
        };
        if let Err(err) = self.out.flush() {
            warn!("console flush failed: {err}");
        }
        written
    }
}

/// One serial port.
pub struct Uart {
    irq: IrqLine,
    tx_fifo: RefCell<VecDeque<u8>>,
    transport: RefCell<Option<Box<dyn Transport>>>,
    rx_count: Cell<u64>,
}

impl Uart {
    pub fn new(irq: IrqLine, transport: Option<Box<dyn Transport>>) -> Self {
        Uart {
            irq,
            tx_fifo: RefCell::new(VecDeque::with_capacity(TX_FIFO_DEPTH)),
            transport: RefCell::new(transport),
            rx_count: Cell::new(0),
        }
    }

    pub fn has_transport(&self) -> bool {
        // Mutably borrowed only while a transport is being written to.
        self.transport
            .try_borrow()
            .map_or(true, |transport| transport.is_some())
    }

    /// Bytes waiting in the TX FIFO
    pub fn tx_pending(&self) -> usize {
        self.tx_fifo.borrow().len()
    }

    /// Bytes accepted from the transport since reset
    pub fn rx_count(&self) -> u64 {
        self.rx_count.get()
    }

    pub fn irq_level(&self) -> bool {
        self.irq.level()
    }

    fn lsr(&self) -> u32 {
        if self.tx_fifo.borrow().len() < TX_FIFO_DEPTH {
            LSR_THRE
        } else {
            0
        }
    }

    fn transmit(&self, ch: u8) {
        {
            let mut fifo = self.tx_fifo.borrow_mut();
            if fifo.len() >= TX_FIFO_DEPTH {
                debug!(ch, "tx fifo full, dropping byte");
                return;
            }
            fifo.push_back(ch);
        }
        self.flush_tx();
        self.irq.raise();
    }

    /// Hand pending TX bytes to the transport. Bytes the transport does not
    /// take stay queued; with no transport they are discarded.
    ///
    /// The FIFO is not borrowed while the transport runs, so a transport may
    /// call back into the port. A flush started from inside the transport's
    /// own `write` is skipped and the bytes stay queued for the outer one.
    pub fn flush_tx(&self) {
        let pending: Vec<u8> = self.tx_fifo.borrow().iter().copied().collect();
        if pending.is_empty() {
            return;
        }
        let Ok(mut transport) = self.transport.try_borrow_mut() else {
            trace!(pending = pending.len(), "tx flush re-entered, deferring");
            return;
        };
        let written = match transport.as_mut() {
            Some(transport) => transport.write(&pending).min(pending.len()),
            None => pending.len(),
        };
        drop(transport);
        trace!(written, pending = pending.len(), "tx flush");
        let mut fifo = self.tx_fifo.borrow_mut();
        let written = written.min(fifo.len());
        fifo.drain(..written);
    }

    /// The port always has room for input.
    pub fn can_receive(&self) -> bool {
        true
    }

    /// Bytes arriving from the transport. A port without a transport has
    /// nothing to receive from and drops them.
    pub fn receive(&self, data: &[u8]) {
        if !self.has_transport() {
            debug!(len = data.len(), "rx on unattached uart, dropping");
            return;
        }
        trace!(len = data.len(), "rx");
        self.rx_count.set(self.rx_count.get() + data.len() as u64);
    }

    /// Ignored when no transport is attached.
    pub fn transport_event(&self, event: TransportEvent) {
        if !self.has_transport() {
            debug!(?event, "transport event on unattached uart, ignoring");
            return;
        }
        debug!(?event, "transport event");
        if event == TransportEvent::Opened {
            self.flush_tx();
        }
    }

    pub(crate) fn save(&self) -> UartSnapshot {
        UartSnapshot {
            tx_fifo: self.tx_fifo.borrow().iter().copied().collect(),
            rx_count: self.rx_count.get(),
            irq_level: self.irq.level(),
        }
    }

    pub(crate) fn load(&self, snapshot: &UartSnapshot) {
        let mut fifo = self.tx_fifo.borrow_mut();
        fifo.clear();
        fifo.extend(snapshot.tx_fifo.iter().take(TX_FIFO_DEPTH));
        drop(fifo);
        self.rx_count.set(snapshot.rx_count);
        self.irq.set(snapshot.irq_level);
    }
}

impl MmioDevice for Uart {
    fn name(&self) -> &'static str {
        "uart"
    }

    fn size(&self) -> u32 {
        UART_MMIO_SIZE
    }

    fn access_sizes(&self) -> AccessSizes {
        AccessSizes::new(1, 4)
    }

    fn read(&self, offset: u32, _size: u8) -> u32 {
        match offset {
            UART_LSR => self.lsr(),
            _ => 0,
        }
    }

    fn write(&self, offset: u32, _size: u8, value: u32) {
        match offset {
            UART_THR => self.transmit(value as u8),
            _ => trace!(offset, value, "write to unmodelled uart register"),
        }
    }

    fn reset(&self) {
        self.tx_fifo.borrow_mut().clear();
        self.rx_count.set(0);
        self.irq.lower();
    }
}

impl fmt::Debug for Uart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("irq", &self.irq)
            .field("tx_pending", &self.tx_pending())
            .field("rx_count", &self.rx_count())
            .field("transport", &self.has_transport())
            .finish()
    }
}
