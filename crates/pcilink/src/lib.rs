//! Host-side control and introspection of PCI Express links.
//!
//! Devices are found in the Linux PCI device tree (`/sys/bus/pci`), either on the local machine
//! or on a remote host reached through a caller-supplied command session. Capability registers
//! are read and written by mnemonic through an external register tool (`setpci`). This crate
//! provides:
//!
//! - [`Backend`]: primitive attribute, link and tool operations, with [`LocalBackend`],
//!   [`RemoteBackend`] and the in-memory [`MockBackend`]
//! - [`CapabilityAccessor`]: register reads/writes and upstream-port addressing
//! - [`decode_link_status`] / [`decode_link_capabilities`]: register decoders
//! - [`PciDevice`]: link speed/width queries, speed changes, retraining, reset and recycle, with
//!   results memoized in a [`DerivedCache`]
//! - [`enumerate`] / [`get`]: discovery

mod backend;
mod cache;
mod capability;
mod config;
mod constants;
mod device;
mod discovery;
mod error;
mod regs;
mod uevent;

pub use backend::{
    shell_quote, Backend, CommandOutput, LocalBackend, MockBackend, MockDevice, RemoteBackend,
    RemoteSession, ToolCall,
};
pub use cache::DerivedCache;
pub use capability::{Addressing, CapabilityAccessor};
pub use config::{HostConfig, DEFAULT_DOMAIN, DEFAULT_SETPCI, DEFAULT_SYSFS_ROOT};
pub use constants::{LinkSpeed, LinkWidth};
pub use device::{DeviceIdentity, PciDevice};
pub use discovery::{enumerate, from_node, get};
pub use error::{BackendError, Result, UeventError};
pub use regs::{
    decode_link_capabilities, decode_link_status, AccessWidth, LinkCapabilities, LinkControl,
    LinkStatus, PortType, Register, CAP_EXP, LINK_CAPABILITIES, LINK_CONTROL, LINK_CONTROL_2,
    LINK_CONTROL_2_TARGET_SPEED_MASK, LINK_STATUS, PCIE_CAPABILITIES,
};
pub use uevent::{parse_uevent, Uevent};

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;
