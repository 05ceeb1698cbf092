use std::sync::Arc;

use tracing::debug;

use crate::backend::Backend;
use crate::regs::{PortType, Register, PCIE_CAPABILITIES};

/// Which function link registers have to be addressed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// The device itself.
    Device,
    /// The device's upstream port.
    UpstreamPort,
}

/// Reads and writes PCI Express capability registers by mnemonic through a [`Backend`].
///
/// An unreadable register is an ordinary outcome (the function may lack the capability, or the
/// tool may be missing) and comes back as `None`/`false`, never as an error.
#[derive(Debug, Clone)]
pub struct CapabilityAccessor {
    backend: Arc<dyn Backend>,
}

impl CapabilityAccessor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Run the tool with a raw mnemonic and return its trimmed output.
    pub fn query(&self, target: &str, mnemonic: &str) -> Option<String> {
        debug!(slot = target, mnemonic, "capability access");
        match self.backend.run_capability_tool(target, mnemonic) {
            Ok(out) => Some(out.trim().to_string()),
            Err(err) => {
                debug!(slot = target, mnemonic, "capability access failed: {err}");
                None
            }
        }
    }

    pub fn read(&self, target: &str, register: Register) -> Option<u32> {
        let text = self.query(target, &register.read_mnemonic())?;
        match u32::from_str_radix(&text, 16) {
            Ok(value) => Some(value & register.width.mask()),
            Err(_) => {
                debug!(slot = target, %register, output = %text, "capability output is not hex");
                None
            }
        }
    }

    pub fn write(&self, target: &str, register: Register, value: u32) -> bool {
        self.query(target, &register.write_mnemonic(value)).is_some()
    }

    /// Decide whether link registers of the function at `slot` must go through its upstream
    /// port.
    ///
    /// Endpoints, legacy endpoints and switch upstream ports are addressed through the port.
    /// `None` means the PCI Express Capabilities register could not be read at all, so the
    /// function has no usable PCIe capability and link operations cannot be performed.
    pub fn resolve_port_addressing(&self, slot: &str) -> Option<Addressing> {
        let raw = self.read(slot, PCIE_CAPABILITIES)?;
        let port_type = PortType::from_capabilities(raw as u16);
        debug!(slot, ?port_type, "resolved port type");
        Some(if port_type.uses_upstream_port() {
            Addressing::UpstreamPort
        } else {
            Addressing::Device
        })
    }
}
