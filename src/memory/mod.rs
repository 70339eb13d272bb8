//! Physical address space with device-mapped I/O
//!
//! Memory layout of the AVP board (see `config::BoardConfig::avp`):
//! 0x40000000 - 0x4003FFFF: IRAM (boot RAM)
//! 0x60004000 - 0x600043FF: INTC (interrupt controller)
//! 0x70006000 - 0x7000601F: UART-A
//! 0x70006300 - 0x7000631F: UART-D (console)

use std::rc::Rc;

use tracing::trace;

use crate::error::BusError;

/// Range of access widths, in bytes, a device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSizes {
    pub min: u8,
    pub max: u8,
}

impl AccessSizes {
    pub const fn new(min: u8, max: u8) -> Self {
        AccessSizes { min, max }
    }

    pub const fn exactly(size: u8) -> Self {
        AccessSizes { min: size, max: size }
    }

    pub fn contains(&self, size: u8) -> bool {
        size >= self.min && size <= self.max
    }
}

/// Trait for memory-mapped devices
///
/// Handlers only ever see accesses that already passed size and window
/// validation. Devices keep their state behind `Cell`/`RefCell`: dispatch is
/// single threaded, and a device is also reachable from the interrupt
/// fabric while mapped.
pub trait MmioDevice {
    fn name(&self) -> &'static str;

    /// Size of the register window in bytes.
    fn size(&self) -> u32;

    fn access_sizes(&self) -> AccessSizes;

    fn read(&self, offset: u32, size: u8) -> u32;

    fn write(&self, offset: u32, size: u8, value: u32);

    fn reset(&self);
}

enum RegionKind {
    Ram(Vec<u8>),
    Mmio(Rc<dyn MmioDevice>),
}

/// One window of the address space.
struct Region {
    base: u32,
    size: u32,
    kind: RegionKind,
}

impl Region {
    fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    fn contains(&self, addr: u32, len: u32) -> bool {
        addr >= self.base && addr as u64 + len as u64 <= self.end()
    }

    fn name(&self) -> &'static str {
        match &self.kind {
            RegionKind::Ram(_) => "ram",
            RegionKind::Mmio(dev) => dev.name(),
        }
    }
}

/// Bus interface for CPU memory access
pub trait Bus {
    fn read(&mut self, addr: u32, size: u8) -> Result<u32, BusError>;
    fn write(&mut self, addr: u32, size: u8, value: u32) -> Result<(), BusError>;

    fn read8(&mut self, addr: u32) -> Result<u8, BusError> {
        self.read(addr, 1).map(|v| v as u8)
    }

    fn read16(&mut self, addr: u32) -> Result<u16, BusError> {
        self.read(addr, 2).map(|v| v as u16)
    }

    fn read32(&mut self, addr: u32) -> Result<u32, BusError> {
        self.read(addr, 4)
    }

    fn write8(&mut self, addr: u32, value: u8) -> Result<(), BusError> {
        self.write(addr, 1, value as u32)
    }

    fn write16(&mut self, addr: u32, value: u16) -> Result<(), BusError> {
        self.write(addr, 2, value as u32)
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<(), BusError> {
        self.write(addr, 4, value)
    }
}

/// Flat 32-bit physical address space: an ordered set of non-overlapping
/// RAM and device windows.
#[derive(Default)]
pub struct AddressSpace {
    regions: Vec<Region>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace { regions: Vec::new() }
    }

    fn insert(&mut self, region: Region) -> Result<(), BusError> {
        let overlap = BusError::RegionOverlap {
            base: region.base,
            size: region.size,
        };
        if region.size == 0 || region.end() > 1u64 << 32 {
            return Err(overlap);
        }
        let idx = self.regions.partition_point(|r| r.base < region.base);
        let clashes_prev = idx > 0 && self.regions[idx - 1].end() > region.base as u64;
        let clashes_next = self
            .regions
            .get(idx)
            .is_some_and(|next| (next.base as u64) < region.end());
        if clashes_prev || clashes_next {
            return Err(overlap);
        }
        self.regions.insert(idx, region);
        Ok(())
    }

    /// Add a zero-filled RAM block.
    pub fn add_ram(&mut self, base: u32, size: u32) -> Result<(), BusError> {
        self.add_ram_buffer(base, vec![0u8; size as usize])
    }

    /// Install an already allocated RAM buffer at `base`.
    pub fn add_ram_buffer(&mut self, base: u32, ram: Vec<u8>) -> Result<(), BusError> {
        let size = u32::try_from(ram.len()).map_err(|_| BusError::RegionOverlap {
            base,
            size: u32::MAX,
        })?;
        self.insert(Region {
            base,
            size,
            kind: RegionKind::Ram(ram),
        })
    }

    /// Map a device's register window at `base`.
    pub fn map_device(&mut self, base: u32, device: Rc<dyn MmioDevice>) -> Result<(), BusError> {
        self.insert(Region {
            base,
            size: device.size(),
            kind: RegionKind::Mmio(device),
        })
    }

    fn find(&self, addr: u32) -> Option<&Region> {
        let idx = self.regions.partition_point(|r| r.base <= addr);
        idx.checked_sub(1)
            .map(|i| &self.regions[i])
            .filter(|r| (addr as u64) < r.end())
    }

    fn find_mut(&mut self, addr: u32) -> Option<&mut Region> {
        let idx = self.regions.partition_point(|r| r.base <= addr);
        idx.checked_sub(1)
            .map(|i| &mut self.regions[i])
            .filter(|r| (addr as u64) < r.end())
    }

    /// Base, size and owner name of the window holding `addr`.
    pub fn region_at(&self, addr: u32) -> Option<(u32, u32, &'static str)> {
        self.find(addr).map(|r| (r.base, r.size, r.name()))
    }

    pub fn regions(&self) -> impl Iterator<Item = (u32, u32, &'static str)> + '_ {
        self.regions.iter().map(|r| (r.base, r.size, r.name()))
    }

    /// Common validation for a single access. Returns the region index.
    fn resolve(&self, addr: u32, size: u8) -> Result<usize, BusError> {
        if !matches!(size, 1 | 2 | 4) {
            return Err(BusError::InvalidAccessSize { addr, size });
        }
        let idx = self.regions.partition_point(|r| r.base <= addr);
        let region = idx
            .checked_sub(1)
            .map(|i| &self.regions[i])
            .filter(|r| r.contains(addr, size as u32))
            .ok_or(BusError::UnmappedAccess { addr, size })?;
        if let RegionKind::Mmio(dev) = &region.kind {
            if !dev.access_sizes().contains(size) {
                return Err(BusError::InvalidAccessSize { addr, size });
            }
        }
        Ok(idx - 1)
    }

    /// Load binary data into RAM
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let err = BusError::UnmappedAccess {
            addr,
            size: data.len().min(u8::MAX as usize) as u8,
        };
        let len = u32::try_from(data.len()).map_err(|_| err)?;
        let region = self.find_mut(addr).filter(|r| r.contains(addr, len)).ok_or(err)?;
        let base = region.base;
        match &mut region.kind {
            RegionKind::Ram(ram) => {
                let offset = (addr - base) as usize;
                ram[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            RegionKind::Mmio(_) => Err(err),
        }
    }

    /// Read RAM contents for debugging (no side effects; devices read as 0)
    pub fn read_bytes(&self, addr: u32, len: u32) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let a = addr.wrapping_add(i);
                match self.find(a) {
                    Some(Region { base, kind: RegionKind::Ram(ram), .. }) => {
                        ram[(a - base) as usize]
                    }
                    _ => 0,
                }
            })
            .collect()
    }

    /// RAM backing the window that starts at `base`.
    pub fn ram(&self, base: u32) -> Option<&[u8]> {
        self.regions.iter().find_map(|r| match &r.kind {
            RegionKind::Ram(ram) if r.base == base => Some(ram.as_slice()),
            _ => None,
        })
    }

    pub(crate) fn ram_blocks(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.regions.iter().filter_map(|r| match &r.kind {
            RegionKind::Ram(ram) => Some((r.base, ram.as_slice())),
            RegionKind::Mmio(_) => None,
        })
    }

    /// Reset every mapped device. RAM keeps its contents so the loaded
    /// image survives a system reset.
    pub fn reset(&mut self) {
        for region in &self.regions {
            if let RegionKind::Mmio(dev) = &region.kind {
                dev.reset();
            }
        }
    }
}

impl Bus for AddressSpace {
    fn read(&mut self, addr: u32, size: u8) -> Result<u32, BusError> {
        let idx = self.resolve(addr, size)?;
        let region = &self.regions[idx];
        let offset = addr - region.base;
        match &region.kind {
            RegionKind::Ram(ram) => {
                let mut bytes = [0u8; 4];
                let offset = offset as usize;
                bytes[..size as usize].copy_from_slice(&ram[offset..offset + size as usize]);
                Ok(u32::from_le_bytes(bytes))
            }
            RegionKind::Mmio(dev) => {
                let value = dev.read(offset, size);
                trace!(device = dev.name(), offset, size, value, "mmio read");
                Ok(value)
            }
        }
    }

    fn write(&mut self, addr: u32, size: u8, value: u32) -> Result<(), BusError> {
        let idx = self.resolve(addr, size)?;
        let region = &mut self.regions[idx];
        let offset = addr - region.base;
        match &mut region.kind {
            RegionKind::Ram(ram) => {
                let offset = offset as usize;
                let bytes = value.to_le_bytes();
                ram[offset..offset + size as usize].copy_from_slice(&bytes[..size as usize]);
            }
            RegionKind::Mmio(dev) => {
                trace!(device = dev.name(), offset, size, value, "mmio write");
                dev.write(offset, size, value);
            }
        }
        Ok(())
    }
}
