//! Board composition
//!
//! Brings together CPU, RAM, the INTC and the UARTs, loads the boot image
//! and owns the reset sequence.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::{BoardConfig, BootInfo};
use crate::cpu::{ArmCpu, CpuCore, Executor};
use crate::devices::{create_intc, create_uart, Intc, Transport, TransportEvent, Uart};
use crate::error::{Error, Result};
use crate::loader::BootImage;
use crate::memory::AddressSpace;
use crate::snapshot::{BoardSnapshot, RamSnapshot, SNAPSHOT_VERSION};

/// Lifecycle of a board. A `Board` value only exists once composition
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardState {
    /// All devices wired and the image loaded.
    Composed,
    /// The execution loop has started dispatching instructions.
    Running,
}

/// Reset hook bound to the board's CPU.
///
/// Puts the core back into its power-on state and then, when boot
/// information is present, points it at the boot entry in ARM state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetHandler {
    boot: Option<BootInfo>,
}

impl ResetHandler {
    pub fn new(boot: Option<BootInfo>) -> Self {
        ResetHandler { boot }
    }

    pub fn boot_info(&self) -> Option<&BootInfo> {
        self.boot.as_ref()
    }

    pub fn reset(&self, cpu: &mut dyn CpuCore) {
        cpu.reset();
        if let Some(info) = &self.boot {
            info!("initializing r15 with {:08x}", info.entry);
            cpu.set_pc(info.entry & 0xFFFF_FFFC);
            cpu.set_thumb(false);
        }
    }
}

/// One composed board.
pub struct Board {
    config: BoardConfig,
    cpu: ArmCpu,
    bus: AddressSpace,
    intc: Rc<Intc>,
    uarts: Vec<Rc<Uart>>,
    reset_handlers: Vec<ResetHandler>,
    state: BoardState,
}

fn alloc_ram(size: u32) -> Result<Vec<u8>> {
    let mut ram = Vec::new();
    ram.try_reserve_exact(size as usize)
        .map_err(|_| Error::DeviceAllocationFailure(format!("{size:#x} bytes of RAM")))?;
    ram.resize(size as usize, 0);
    Ok(ram)
}

impl Board {
    /// Build the board described by `config`, load `image` at the RAM base
    /// and run the initial reset.
    ///
    /// `console` is attached to the UART flagged as console; every other
    /// UART is left without a transport. Any failure aborts the whole
    /// bring-up.
    pub fn compose(
        config: BoardConfig,
        image: &BootImage,
        console: Option<Box<dyn Transport>>,
    ) -> Result<Board> {
        config.validate()?;

        let mut bus = AddressSpace::new();
        bus.add_ram_buffer(config.ram_base, alloc_ram(config.ram_size)?)?;

        let cpu = ArmCpu::new(config.cpu);
        debug!(profile = %config.cpu, "cpu created");

        let (intc, _) = create_intc(&mut bus, config.intc_base, cpu.irq_input())?;

        let mut console = console;
        let mut uarts = Vec::with_capacity(config.uarts.len());
        for uart in &config.uarts {
            let transport = if uart.console { console.take() } else { None };
            uarts.push(create_uart(&mut bus, uart.base, intc.input(uart.irq), transport)?);
        }

        let image_name = || {
            image
                .path()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| "<memory>".into())
        };
        if image.len() > config.ram_size as usize {
            return Err(Error::boot_image(
                image_name(),
                format!("image is {} bytes, RAM holds {}", image.len(), config.ram_size),
            ));
        }
        bus.load(config.ram_base, image.data())
            .map_err(|e| Error::boot_image(image_name(), e))?;
        info!(len = image.len(), "boot image loaded at {:#010x}", config.ram_base);

        let mut boot = config.boot.clone();
        if boot.image.is_none() {
            boot.image = image.path().map(|p| p.to_path_buf());
        }

        let mut board = Board {
            config,
            cpu,
            bus,
            intc,
            uarts,
            reset_handlers: Vec::new(),
            state: BoardState::Composed,
        };
        board.register_reset(ResetHandler::new(Some(boot)));
        board.reset();
        Ok(board)
    }

    /// Register a reset hook. Hooks run in registration order.
    pub fn register_reset(&mut self, handler: ResetHandler) {
        self.reset_handlers.push(handler);
    }

    /// System reset: devices first, then the registered hooks.
    pub fn reset(&mut self) {
        self.bus.reset();
        for handler in &self.reset_handlers {
            handler.reset(&mut self.cpu);
        }
    }

    /// Enter the running state.
    pub fn start(&mut self) {
        if self.state != BoardState::Running {
            info!("board running from {:#010x}", self.cpu.pc());
            self.state = BoardState::Running;
        }
    }

    /// Step `executor` up to `steps` times, starting the board if needed.
    /// Stops at the first error.
    pub fn run<E: Executor<ArmCpu>>(&mut self, executor: &mut E, steps: u64) -> Result<()> {
        self.start();
        for _ in 0..steps {
            executor.step(&mut self.cpu, &mut self.bus)?;
        }
        Ok(())
    }

    pub fn state(&self) -> BoardState {
        self.state
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Boot information established at composition time
    pub fn boot_info(&self) -> Option<&BootInfo> {
        self.reset_handlers.iter().find_map(ResetHandler::boot_info)
    }

    pub fn cpu(&self) -> &ArmCpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut ArmCpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &AddressSpace {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut AddressSpace {
        &mut self.bus
    }

    pub fn intc(&self) -> &Rc<Intc> {
        &self.intc
    }

    /// UART `idx`, in the order the config lists them
    pub fn uart(&self, idx: usize) -> Option<&Rc<Uart>> {
        self.uarts.get(idx)
    }

    pub fn uarts(&self) -> &[Rc<Uart>] {
        &self.uarts
    }

    /// Deliver bytes from a UART's transport. Returns false when there is
    /// no such UART, it has no transport or it cannot take input.
    pub fn uart_receive(&mut self, idx: usize, data: &[u8]) -> bool {
        match self.uarts.get(idx) {
            Some(uart) if uart.has_transport() && uart.can_receive() => {
                uart.receive(data);
                true
            }
            _ => false,
        }
    }

    /// Forward a transport event to UART `idx`. Ports without a transport
    /// ignore it.
    pub fn uart_event(&mut self, idx: usize, event: TransportEvent) {
        if let Some(uart) = self.uarts.get(idx) {
            uart.transport_event(event);
        }
    }

    /// Read RAM for debugging (no side effects)
    pub fn read_memory(&self, addr: u32, size: u32) -> Vec<u8> {
        self.bus.read_bytes(addr, size)
    }

    /// Capture CPU, device and RAM state.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            version: SNAPSHOT_VERSION,
            cpu: self.cpu.save(),
            intc: self.intc.save(),
            uarts: self.uarts.iter().map(|u| u.save()).collect(),
            ram: self
                .bus
                .ram_blocks()
                .map(|(base, data)| RamSnapshot { base, data: data.to_vec() })
                .collect(),
        }
    }

    /// Restore a snapshot taken from a board with the same layout.
    pub fn restore(&mut self, snapshot: &BoardSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!("unsupported version {}", snapshot.version)));
        }
        if snapshot.cpu.profile != self.cpu.profile() {
            return Err(Error::Snapshot(format!(
                "snapshot is for {}, board has {}",
                snapshot.cpu.profile,
                self.cpu.profile()
            )));
        }
        if snapshot.uarts.len() != self.uarts.len() {
            return Err(Error::Snapshot(format!(
                "snapshot has {} uarts, board has {}",
                snapshot.uarts.len(),
                self.uarts.len()
            )));
        }
        let layout_matches = snapshot.ram.len() == self.bus.ram_blocks().count()
            && snapshot
                .ram
                .iter()
                .zip(self.bus.ram_blocks())
                .all(|(s, (base, data))| s.base == base && s.data.len() == data.len());
        if !layout_matches {
            return Err(Error::Snapshot("RAM layout mismatch".into()));
        }

        for block in &snapshot.ram {
            self.bus.load(block.base, &block.data)?;
        }
        self.cpu.load(&snapshot.cpu);
        self.intc.load(&snapshot.intc);
        // Sources re-drive their lines so the INTC and CPU pin agree.
        for (uart, state) in self.uarts.iter().zip(&snapshot.uarts) {
            uart.load(state);
        }
        debug!("snapshot restored");
        Ok(())
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("state", &self.state)
            .field("cpu", &self.cpu)
            .field("intc", &self.intc)
            .field("uarts", &self.uarts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AVP_IRAM_BASE, TEGRA_INTC_BASE};
    use crate::devices::ConsoleTransport;
    use crate::memory::Bus;

    fn image(bytes: &[u8]) -> BootImage {
        BootImage::from_bytes(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_compose_avp() {
        let board = Board::compose(BoardConfig::avp(), &image(&[1, 2, 3, 4]), None).unwrap();
        assert_eq!(board.state(), BoardState::Composed);
        assert_eq!(board.cpu().pc(), AVP_IRAM_BASE);
        assert!(!board.cpu().thumb());
        assert_eq!(board.read_memory(AVP_IRAM_BASE, 4), vec![1, 2, 3, 4]);
        assert_eq!(board.uarts().len(), 2);
        assert_eq!(board.boot_info().unwrap().entry, AVP_IRAM_BASE);

        let names: Vec<_> = board.bus().regions().map(|(_, _, name)| name).collect();
        assert_eq!(names, vec!["ram", "intc", "uart", "uart"]);
    }

    #[test]
    fn test_console_goes_to_flagged_uart() {
        let console: Box<dyn Transport> =
            Box::new(ConsoleTransport::new(Box::new(Vec::<u8>::new())));
        let board = Board::compose(BoardConfig::avp(), &image(&[0]), Some(console)).unwrap();
        assert!(!board.uart(0).unwrap().has_transport());
        assert!(board.uart(1).unwrap().has_transport());
    }

    #[test]
    fn test_reset_masks_entry_and_clears_thumb() {
        let mut config = BoardConfig::avp();
        config.boot.entry = AVP_IRAM_BASE + 0x103;
        let mut board = Board::compose(config, &image(&[0; 8]), None).unwrap();

        board.cpu_mut().set_thumb(true);
        board.cpu_mut().set_pc(0xDEAD_BEEF);
        board.cpu_mut().write_reg(0, 42);
        board.reset();
        assert_eq!(board.cpu().pc(), AVP_IRAM_BASE + 0x100);
        assert!(!board.cpu().thumb());
        assert_eq!(board.cpu().read_reg(0), 0);
    }

    #[test]
    fn test_reset_without_boot_info_uses_cpu_default() {
        let mut cpu = ArmCpu::new(crate::cpu::CpuProfile::Arm720t);
        cpu.set_pc(0x1000);
        ResetHandler::new(None).reset(&mut cpu);
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_image_too_large() {
        let mut config = BoardConfig::avp();
        config.ram_size = 0x10;
        let err = Board::compose(config, &image(&[0; 0x11]), None).unwrap_err();
        assert!(matches!(err, Error::BootImageLoadFailure { .. }));
    }

    #[test]
    fn test_overlapping_layout_fails() {
        let mut config = BoardConfig::avp();
        config.intc_base = AVP_IRAM_BASE + 0x1000;
        let err = Board::compose(config, &image(&[0]), None).unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }

    #[test]
    fn test_reset_lowers_uart_interrupt() {
        let mut board = Board::compose(BoardConfig::avp(), &image(&[0]), None).unwrap();
        board.bus_mut().write8(0x7000_6000, b'!').unwrap();
        assert!(board.cpu().irq_pending());
        board.reset();
        assert!(!board.cpu().irq_pending());
        assert_eq!(board.bus_mut().read32(TEGRA_INTC_BASE + 0x110).unwrap(), 0);
    }

    #[test]
    fn test_uart_receive() {
        let mut board = Board::compose(BoardConfig::avp(), &image(&[0]), None).unwrap();
        assert!(!board.uart_receive(0, b"abc"));
        assert!(!board.uart_receive(1, b"abc"));
        assert!(!board.uart_receive(7, b"abc"));
        assert_eq!(board.uart(0).unwrap().rx_count(), 0);
        assert_eq!(board.uart(1).unwrap().rx_count(), 0);
    }

    #[test]
    fn test_uart_receive_on_console() {
        let console: Box<dyn Transport> =
            Box::new(ConsoleTransport::new(Box::new(Vec::<u8>::new())));
        let mut board = Board::compose(BoardConfig::avp(), &image(&[0]), Some(console)).unwrap();
        assert!(board.uart_receive(1, b"abc"));
        assert_eq!(board.uart(1).unwrap().rx_count(), 3);
        // UART-A stays unattached.
        assert!(!board.uart_receive(0, b"abc"));
        assert_eq!(board.uart(0).unwrap().rx_count(), 0);
    }
}
