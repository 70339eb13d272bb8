//! Board configuration
//!
//! Fixed physical layout and boot parameters of a board. The reference
//! platform is [`BoardConfig::avp`].

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cpu::CpuProfile;
use crate::devices::INTC_NUM_IRQS;
use crate::error::{Error, Result};

pub const AVP_IRAM_BASE: u32 = 0x4000_0000;
pub const AVP_IRAM_SIZE: u32 = 0x0004_0000;
pub const TEGRA_INTC_BASE: u32 = 0x6000_4000;
pub const TEGRA_UARTA_BASE: u32 = 0x7000_6000;
pub const TEGRA_UARTD_BASE: u32 = 0x7000_6300;

// INTC inputs
pub const TEGRA_UARTA_IRQ: usize = 36;
pub const TEGRA_UARTD_IRQ: usize = 90;

/// One UART instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    pub base: u32,
    /// INTC input the UART drives
    pub irq: usize,
    /// Attach the host console transport
    #[serde(default)]
    pub console: bool,
}

/// What is needed to start firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    /// Physical address of the first instruction
    pub entry: u32,
    /// Where the image came from, if it was read from a file
    #[serde(default)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub cpu: CpuProfile,
    pub ram_base: u32,
    pub ram_size: u32,
    pub intc_base: u32,
    pub uarts: Vec<UartConfig>,
    pub boot: BootInfo,
}

impl BoardConfig {
    /// NVIDIA Tegra AVP
    pub fn avp() -> Self {
        BoardConfig {
            cpu: CpuProfile::Arm720t,
            ram_base: AVP_IRAM_BASE,
            ram_size: AVP_IRAM_SIZE,
            intc_base: TEGRA_INTC_BASE,
            uarts: vec![
                UartConfig { base: TEGRA_UARTA_BASE, irq: TEGRA_UARTA_IRQ, console: false },
                UartConfig { base: TEGRA_UARTD_BASE, irq: TEGRA_UARTD_IRQ, console: true },
            ],
            boot: BootInfo { entry: AVP_IRAM_BASE, image: None },
        }
    }

    /// Reject layouts the board cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.ram_size == 0 {
            return Err(Error::DeviceAllocationFailure("zero-sized RAM".into()));
        }
        let mut bases = HashSet::new();
        let mut irqs = HashSet::new();
        for uart in &self.uarts {
            if uart.irq >= INTC_NUM_IRQS {
                return Err(Error::DeviceAllocationFailure(format!(
                    "uart at {:#010x}: INTC input {} out of range",
                    uart.base, uart.irq
                )));
            }
            if !bases.insert(uart.base) {
                return Err(Error::DeviceAllocationFailure(format!(
                    "uart at {:#010x}: duplicate base",
                    uart.base
                )));
            }
            if !irqs.insert(uart.irq) {
                return Err(Error::DeviceAllocationFailure(format!(
                    "uart at {:#010x}: INTC input {} already wired",
                    uart.base, uart.irq
                )));
            }
        }
        Ok(())
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::avp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avp_layout_is_valid() {
        let config = BoardConfig::avp();
        config.validate().unwrap();
        assert_eq!(config.boot.entry, config.ram_base);
        assert_eq!(config.uarts.iter().filter(|u| u.console).count(), 1);
    }

    #[test]
    fn test_rejects_bad_irq() {
        let mut config = BoardConfig::avp();
        config.uarts[0].irq = 128;
        assert!(matches!(config.validate(), Err(Error::DeviceAllocationFailure(_))));
    }

    #[test]
    fn test_rejects_shared_irq() {
        let mut config = BoardConfig::avp();
        config.uarts[1].irq = config.uarts[0].irq;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_ram() {
        let mut config = BoardConfig::avp();
        config.ram_size = 0;
        assert!(config.validate().is_err());
    }
}
