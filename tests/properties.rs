use avpemu::config::BootInfo;
use avpemu::devices::{Intc, Uart, INTC_NUM_IRQS, TX_FIFO_DEPTH};
use avpemu::memory::AccessSizes;
use avpemu::{
    AddressSpace, ArmCpu, Bus, BusError, CpuCore, CpuProfile, IrqLine, MmioDevice, ResetHandler,
    Transport,
};
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

const LSR: u32 = 0x14;
const LSR_THRE: u32 = 1 << 5;

/// Device that counts the accesses it sees.
struct Probe {
    size: u32,
    hits: Cell<u32>,
    last: Cell<(u32, u8)>,
}

impl Probe {
    fn new(size: u32) -> Rc<Self> {
        Rc::new(Probe { size, hits: Cell::new(0), last: Cell::new((0, 0)) })
    }
}

impl MmioDevice for Probe {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn access_sizes(&self) -> AccessSizes {
        AccessSizes::new(1, 4)
    }

    fn read(&self, offset: u32, size: u8) -> u32 {
        self.hits.set(self.hits.get() + 1);
        self.last.set((offset, size));
        0
    }

    fn write(&self, offset: u32, size: u8, _value: u32) {
        self.hits.set(self.hits.get() + 1);
        self.last.set((offset, size));
    }

    fn reset(&self) {}
}

/// Transport that never takes anything.
struct Stalled;

impl Transport for Stalled {
    fn write(&mut self, _data: &[u8]) -> usize {
        0
    }
}

proptest! {
    #[test]
    fn dispatch_reaches_only_the_owner(
        sizes in prop::collection::vec(1u32..=4, 1..6),
        slot in 0usize..6,
        offset in 0u32..0x1000,
        size in prop::sample::select(vec![1u8, 2, 4]),
        write in any::<bool>(),
    ) {
        // Windows of 0x100..0x400 bytes spaced 0x1000 apart.
        let mut space = AddressSpace::new();
        let probes: Vec<_> = sizes.iter().map(|s| Probe::new(s * 0x100)).collect();
        for (i, probe) in probes.iter().enumerate() {
            space.map_device(0x1000_0000 + i as u32 * 0x1000, probe.clone()).unwrap();
        }

        let addr = 0x1000_0000 + slot as u32 * 0x1000 + offset;
        let owner = probes.get(slot).filter(|p| offset + size as u32 <= p.size);
        let result = if write {
            space.write(addr, size, 0x5A5A_5A5A)
        } else {
            space.read(addr, size).map(|_| ())
        };

        match owner {
            Some(probe) => {
                prop_assert!(result.is_ok());
                prop_assert_eq!(probe.hits.get(), 1);
                prop_assert_eq!(probe.last.get(), (offset, size));
            }
            None => prop_assert_eq!(result, Err(BusError::UnmappedAccess { addr, size })),
        }
        let total: u32 = probes.iter().map(|p| p.hits.get()).sum();
        prop_assert_eq!(total, owner.is_some() as u32);
    }

    #[test]
    fn lsr_reflects_tx_occupancy(writes in 0usize..20) {
        let uart = Uart::new(IrqLine::detached(), Some(Box::new(Stalled)));
        for i in 0..writes {
            uart.write(0, 1, i as u32);
        }
        let pending = writes.min(TX_FIFO_DEPTH);
        prop_assert_eq!(uart.tx_pending(), pending);
        prop_assert_eq!(uart.read(LSR, 4) & LSR_THRE != 0, pending < TX_FIFO_DEPTH);
    }

    #[test]
    fn intc_output_is_or_of_inputs(
        active in prop::collection::btree_set(0usize..INTC_NUM_IRQS, 0..16),
    ) {
        let output = IrqLine::detached();
        let intc = Rc::new(Intc::new(output.clone()));
        let inputs: Vec<IrqLine> = (0..INTC_NUM_IRQS).map(|n| intc.input(n)).collect();

        for &n in &active {
            inputs[n].raise();
        }
        prop_assert_eq!(output.level(), !active.is_empty());

        let mut remaining: BTreeSet<usize> = active.clone();
        for &n in &active {
            inputs[n].lower();
            remaining.remove(&n);
            prop_assert_eq!(output.level(), !remaining.is_empty());
        }
    }

    #[test]
    fn reset_lands_on_aligned_entry(
        entry in any::<u32>(),
        pc in any::<u32>(),
        thumb in any::<bool>(),
        reg in any::<u32>(),
    ) {
        let mut cpu = ArmCpu::new(CpuProfile::Arm720t);
        cpu.set_pc(pc);
        cpu.set_thumb(thumb);
        cpu.write_reg(1, reg);

        let handler = ResetHandler::new(Some(BootInfo { entry, image: None }));
        handler.reset(&mut cpu);
        prop_assert_eq!(cpu.pc(), entry & 0xFFFF_FFFC);
        prop_assert!(!cpu.thumb());
        prop_assert_eq!(cpu.read_reg(1), 0);
    }
}
