//! PCI Express capability register definitions and pure decoders.
//!
//! Nothing in this module performs I/O. Raw values come from the capability tool (see
//! [`crate::CapabilityAccessor`]) and are decoded here into plain value types.

use std::fmt;

use bitflags::bitflags;

use crate::constants::{LinkSpeed, LinkWidth};

/// Capability structure name understood by the register access tool.
pub const CAP_EXP: &str = "CAP_EXP";

/// Access width suffix of a register mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Word,
    Long,
}

impl AccessWidth {
    pub fn suffix(self) -> char {
        match self {
            AccessWidth::Byte => 'B',
            AccessWidth::Word => 'W',
            AccessWidth::Long => 'L',
        }
    }

    /// Number of hex digits the tool prints for this width.
    pub fn hex_digits(self) -> usize {
        match self {
            AccessWidth::Byte => 2,
            AccessWidth::Word => 4,
            AccessWidth::Long => 8,
        }
    }

    pub fn mask(self) -> u32 {
        match self {
            AccessWidth::Byte => 0xFF,
            AccessWidth::Word => 0xFFFF,
            AccessWidth::Long => 0xFFFF_FFFF,
        }
    }
}

/// A register inside a capability structure, addressed as `<space>+<offset>.<width>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub space: &'static str,
    pub offset: u16,
    pub width: AccessWidth,
}

impl Register {
    pub const fn new(space: &'static str, offset: u16, width: AccessWidth) -> Self {
        Self {
            space,
            offset,
            width,
        }
    }

    /// Mnemonic used to read the register, e.g. `CAP_EXP+10.W`.
    pub fn read_mnemonic(&self) -> String {
        self.to_string()
    }

    /// Mnemonic used to write `value`, e.g. `CAP_EXP+10.W=0041`. The value is truncated and
    /// zero-padded to the access width.
    pub fn write_mnemonic(&self, value: u32) -> String {
        format!(
            "{self}={:0digits$x}",
            value & self.width.mask(),
            digits = self.width.hex_digits()
        )
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:02x}.{}", self.space, self.offset, self.width.suffix())
    }
}

/// PCI Express Capabilities register.
pub const PCIE_CAPABILITIES: Register = Register::new(CAP_EXP, 0x02, AccessWidth::Word);
/// Link Capabilities register.
pub const LINK_CAPABILITIES: Register = Register::new(CAP_EXP, 0x0c, AccessWidth::Long);
/// Link Control register.
pub const LINK_CONTROL: Register = Register::new(CAP_EXP, 0x10, AccessWidth::Word);
/// Link Status register.
pub const LINK_STATUS: Register = Register::new(CAP_EXP, 0x12, AccessWidth::Word);
/// Link Control 2 register (PCIe 2.0+).
pub const LINK_CONTROL_2: Register = Register::new(CAP_EXP, 0x30, AccessWidth::Word);

/// Target Link Speed field of Link Control 2.
pub const LINK_CONTROL_2_TARGET_SPEED_MASK: u16 = 0x000F;

bitflags! {
    /// Link Control register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct LinkControl: u16 {
        const ASPM_L0S = 1 << 0;
        const ASPM_L1 = 1 << 1;
        const READ_COMPLETION_BOUNDARY = 1 << 3;
        const LINK_DISABLE = 1 << 4;
        const RETRAIN_LINK = 1 << 5;
        const COMMON_CLOCK = 1 << 6;
        const EXTENDED_SYNCH = 1 << 7;
        const CLOCK_PM = 1 << 8;
        const HW_AUTONOMOUS_WIDTH_DISABLE = 1 << 9;
        const BW_MGMT_INTERRUPT = 1 << 10;
        const AUTONOMOUS_BW_INTERRUPT = 1 << 11;
    }
}

/// Device/Port Type field (bits 7:4) of the PCI Express Capabilities register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Endpoint,
    LegacyEndpoint,
    RootPort,
    SwitchUpstream,
    SwitchDownstream,
    PcieToPciBridge,
    PciToPcieBridge,
    RootComplexIntegratedEndpoint,
    RootComplexEventCollector,
    Reserved(u8),
}

impl PortType {
    pub fn from_capabilities(raw: u16) -> Self {
        match ((raw >> 4) & 0xF) as u8 {
            0 => PortType::Endpoint,
            1 => PortType::LegacyEndpoint,
            4 => PortType::RootPort,
            5 => PortType::SwitchUpstream,
            6 => PortType::SwitchDownstream,
            7 => PortType::PcieToPciBridge,
            8 => PortType::PciToPcieBridge,
            9 => PortType::RootComplexIntegratedEndpoint,
            10 => PortType::RootComplexEventCollector,
            other => PortType::Reserved(other),
        }
    }

    /// Whether link registers for this function have to be addressed through its upstream port.
    pub fn uses_upstream_port(self) -> bool {
        matches!(
            self,
            PortType::Endpoint | PortType::LegacyEndpoint | PortType::SwitchUpstream
        )
    }
}

/// Decoded Link Status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub raw: u16,
    /// Current Link Speed code (bits 3:0).
    pub link_speed: u8,
    /// Negotiated Link Width (bits 9:4).
    pub link_width: u8,
    /// Link Training (bit 11).
    pub link_training: bool,
    /// Slot Clock Configuration (bit 12).
    pub slot_clock: bool,
    /// Data Link Layer Link Active (bit 13).
    pub dll_active: bool,
    reserved: u8,
}

impl LinkStatus {
    pub fn speed(&self) -> LinkSpeed {
        LinkSpeed::from_code(self.link_speed)
    }

    pub fn width(&self) -> LinkWidth {
        LinkWidth::from_code(self.link_width)
    }

    /// Bits 15:14, carried through undecoded.
    pub fn reserved(&self) -> u8 {
        self.reserved
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<LinkStatus speed={} width={} training={} slot_clock={} dll={}>",
            self.link_speed, self.link_width, self.link_training, self.slot_clock, self.dll_active
        )
    }
}

/// Decoded Link Capabilities register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCapabilities {
    pub raw: u32,
    /// Max Link Speed code (bits 3:0).
    pub max_speed: u8,
    /// Maximum Link Width (bits 9:4).
    pub max_width: u8,
    /// ASPM Support (bits 11:10).
    pub active_state_pm: u8,
    /// L0s Exit Latency (bits 14:12).
    pub l0s_exit_latency: u8,
    /// L1 Exit Latency (bits 17:15).
    pub l1_exit_latency: u8,
    pub clock_pm: bool,
    /// Surprise Down Error Reporting Capable.
    pub spde_reporting: bool,
    /// Data Link Layer Link Active Reporting Capable.
    pub dlla_reporting: bool,
    /// Link Bandwidth Notification Capability.
    pub lbwn_reporting: bool,
    /// ASPM Optionality Compliance.
    pub aspmop_compliant: bool,
    reserved: bool,
    /// Port Number (bits 31:24).
    pub port_number: u8,
}

impl LinkCapabilities {
    pub fn speed(&self) -> LinkSpeed {
        LinkSpeed::from_code(self.max_speed)
    }

    pub fn width(&self) -> LinkWidth {
        LinkWidth::from_code(self.max_width)
    }

    /// Bit 23, carried through undecoded.
    pub fn reserved(&self) -> bool {
        self.reserved
    }
}

impl fmt::Display for LinkCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<LinkCapabilities port_number={} max_speed={} max_width={} l0s={} l1={} clock_pm={}>",
            self.port_number,
            self.max_speed,
            self.max_width,
            self.l0s_exit_latency,
            self.l1_exit_latency,
            self.clock_pm
        )
    }
}

pub fn decode_link_status(value: u16) -> LinkStatus {
    LinkStatus {
        raw: value,
        link_speed: (value & 0x000F) as u8,
        link_width: ((value >> 4) & 0x3F) as u8,
        link_training: value & (1 << 11) != 0,
        slot_clock: value & (1 << 12) != 0,
        dll_active: value & (1 << 13) != 0,
        reserved: ((value >> 14) & 0x3) as u8,
    }
}

pub fn decode_link_capabilities(value: u32) -> LinkCapabilities {
    LinkCapabilities {
        raw: value,
        max_speed: (value & 0xF) as u8,
        max_width: ((value >> 4) & 0x3F) as u8,
        active_state_pm: ((value >> 10) & 0x3) as u8,
        l0s_exit_latency: ((value >> 12) & 0x7) as u8,
        l1_exit_latency: ((value >> 15) & 0x7) as u8,
        clock_pm: value & (1 << 18) != 0,
        spde_reporting: value & (1 << 19) != 0,
        dlla_reporting: value & (1 << 20) != 0,
        lbwn_reporting: value & (1 << 21) != 0,
        aspmop_compliant: value & (1 << 22) != 0,
        reserved: value & (1 << 23) != 0,
        port_number: (value >> 24) as u8,
    }
}
