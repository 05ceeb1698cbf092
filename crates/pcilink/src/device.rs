use std::cell::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::cache::DerivedCache;
use crate::capability::{Addressing, CapabilityAccessor};
use crate::constants::{LinkSpeed, LinkWidth};
use crate::regs::{
    decode_link_capabilities, decode_link_status, LinkCapabilities, LinkControl, LinkStatus,
    LINK_CAPABILITIES, LINK_CONTROL, LINK_CONTROL_2, LINK_CONTROL_2_TARGET_SPEED_MASK,
    LINK_STATUS,
};

/// Who a device is and where it lives in the device tree.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Canonical `<domain>:<bus>:<device>.<function>`.
    pub slot: String,
    pub vendor: u16,
    pub device: u16,
    /// `<sysfs root>/devices/<slot>`.
    pub node: PathBuf,
    port: OnceCell<String>,
}

/// A PCI(e) function on the local machine or on a remote host.
///
/// All queries are synchronous and resolve failures to a sentinel (`None`,
/// [`LinkSpeed::Unknown`], [`LinkWidth::Unknown`] or `false`). Link properties are memoized in a
/// [`DerivedCache`] that every mutating operation clears before returning.
///
/// A device is not `Sync`: concurrent callers should use one device (and backend handle) each.
#[derive(Debug)]
pub struct PciDevice {
    identity: DeviceIdentity,
    backend: Arc<dyn Backend>,
    caps: CapabilityAccessor,
    cache: DerivedCache,
}

impl PciDevice {
    /// Bind a device to `backend`. `slot` must be canonical (domain-prefixed).
    pub fn new(slot: &str, vendor: u16, device: u16, backend: Arc<dyn Backend>) -> Self {
        let node = backend.config().device_node(slot);
        Self {
            identity: DeviceIdentity {
                slot: slot.to_string(),
                vendor,
                device,
                node,
                port: OnceCell::new(),
            },
            caps: CapabilityAccessor::new(Arc::clone(&backend)),
            backend,
            cache: DerivedCache::default(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn slot(&self) -> &str {
        &self.identity.slot
    }

    pub fn vendor(&self) -> u16 {
        self.identity.vendor
    }

    pub fn device(&self) -> u16 {
        self.identity.device
    }

    pub fn node(&self) -> &Path {
        &self.identity.node
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn capabilities(&self) -> &CapabilityAccessor {
        &self.caps
    }

    pub fn cache(&self) -> &DerivedCache {
        &self.cache
    }

    /// Slot of the upstream port: the name of the directory the device node links into.
    ///
    /// Resolved on first use. If the node is not a readable link the device's own slot is used.
    pub fn port(&self) -> &str {
        self.identity.port.get_or_init(|| {
            let link = match self.backend.read_link(&self.identity.node) {
                Ok(link) => link,
                Err(err) => {
                    debug!(slot = %self.identity.slot, "cannot resolve upstream port: {err}");
                    return self.identity.slot.clone();
                }
            };
            match link
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
            {
                Some(port) => port,
                None => {
                    debug!(slot = %self.identity.slot, link = %link.display(), "device link has no parent");
                    self.identity.slot.clone()
                }
            }
        })
    }

    fn target(&self, addressing: Addressing) -> String {
        match addressing {
            Addressing::Device => self.identity.slot.clone(),
            Addressing::UpstreamPort => self.port().to_string(),
        }
    }

    fn link_target(&self) -> Option<String> {
        let addressing = self.caps.resolve_port_addressing(&self.identity.slot)?;
        Some(self.target(addressing))
    }

    /// Decoded Link Status register, `None` when it cannot be read.
    pub fn link_status(&self) -> Option<LinkStatus> {
        *self.cache.link_status.get_or_init(|| {
            let target = self.link_target()?;
            let raw = self.caps.read(&target, LINK_STATUS)?;
            Some(decode_link_status(raw as u16))
        })
    }

    /// Decoded Link Capabilities register, `None` when it cannot be read.
    pub fn link_capabilities(&self) -> Option<LinkCapabilities> {
        *self.cache.link_capabilities.get_or_init(|| {
            let target = self.link_target()?;
            let raw = self.caps.read(&target, LINK_CAPABILITIES)?;
            Some(decode_link_capabilities(raw))
        })
    }

    /// Maximum supported link speed, from Link Capabilities or else the `max_link_speed`
    /// attribute.
    pub fn max_speed(&self) -> LinkSpeed {
        *self.cache.max_speed.get_or_init(|| match self.link_capabilities() {
            Some(caps) => caps.speed(),
            None => self
                .read_node_attribute("max_link_speed")
                .map(|text| LinkSpeed::from_sysfs(&text))
                .unwrap_or(LinkSpeed::Unknown),
        })
    }

    /// Maximum supported link width, from Link Capabilities or else the `max_link_width`
    /// attribute.
    pub fn max_width(&self) -> LinkWidth {
        *self.cache.max_width.get_or_init(|| match self.link_capabilities() {
            Some(caps) => caps.width(),
            None => self
                .read_node_attribute("max_link_width")
                .map(|text| LinkWidth::from_sysfs(&text))
                .unwrap_or(LinkWidth::Unknown),
        })
    }

    /// Speed of the currently active link.
    pub fn link_speed(&self) -> LinkSpeed {
        *self.cache.link_speed.get_or_init(|| {
            self.link_status()
                .map_or(LinkSpeed::Unknown, |status| status.speed())
        })
    }

    /// Width of the currently active link.
    pub fn link_width(&self) -> LinkWidth {
        *self.cache.link_width.get_or_init(|| {
            self.link_status()
                .map_or(LinkWidth::Unknown, |status| status.width())
        })
    }

    fn read_node_attribute(&self, name: &str) -> Option<String> {
        let path = self.identity.node.join(name);
        match self.backend.read_attribute(&path) {
            Ok(text) => Some(text.trim().to_string()),
            Err(err) => {
                debug!(slot = %self.identity.slot, "{err}");
                None
            }
        }
    }

    fn write_node_attribute(&self, path: &Path, value: &str) -> bool {
        match self.backend.write_attribute(path, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(slot = %self.identity.slot, "{err}");
                false
            }
        }
    }

    /// Program the Target Link Speed and retrain the link.
    ///
    /// Requests above [`Self::max_speed`] are clamped to it. Only PCIe 2.0+ functions have the
    /// Link Control 2 register; on anything else this returns `false`.
    pub fn set_speed(&mut self, requested: LinkSpeed) -> bool {
        if requested.is_unknown() {
            warn!(slot = %self.identity.slot, "refusing to set an unknown link speed");
            return false;
        }

        let Some(target) = self.link_target() else {
            warn!(slot = %self.identity.slot, "no PCIe capability, cannot set link speed");
            return false;
        };

        let Some(control2) = self.caps.read(&target, LINK_CONTROL_2) else {
            warn!(slot = %self.identity.slot, "unable to access the Link Control 2 register");
            return false;
        };

        info!(slot = %self.identity.slot, "setting link speed to {requested}");
        let max = self.max_speed();
        let speed = if requested > max {
            warn!(
                slot = %self.identity.slot,
                "requested link speed {requested} is faster than maximum speed {max}, clamping"
            );
            max
        } else {
            requested
        };

        // Target Link Speed takes the ordinal of the speed. This holds because the speeds are
        // in order and we never exceed the maximum; the supported speeds vector in Link
        // Capabilities 2 is not consulted.
        let value = (control2 as u16 & !LINK_CONTROL_2_TARGET_SPEED_MASK) | u16::from(speed.code());
        let written = self.caps.write(&target, LINK_CONTROL_2, value.into());
        self.cache.invalidate_all();

        if !written {
            warn!(slot = %self.identity.slot, "failed to write the Link Control 2 register");
            return false;
        }

        self.retrain_link()
    }

    /// Set Retrain Link in the Link Control register.
    pub fn retrain_link(&mut self) -> bool {
        let Some(target) = self.link_target() else {
            warn!(slot = %self.identity.slot, "no PCIe capability, cannot retrain link");
            return false;
        };

        let Some(control) = self.caps.read(&target, LINK_CONTROL) else {
            warn!(slot = %self.identity.slot, "unable to access the Link Control register");
            return false;
        };

        info!(slot = %self.identity.slot, "forcing link retraining");
        let control = LinkControl::from_bits_retain(control as u16) | LinkControl::RETRAIN_LINK;
        let written = self.caps.write(&target, LINK_CONTROL, control.bits().into());
        self.cache.invalidate_all();

        if !written {
            warn!(slot = %self.identity.slot, "failed to write the Link Control register");
        }
        written
    }

    /// Soft-reset the function through its `reset` attribute.
    pub fn reset(&mut self) {
        info!(slot = %self.identity.slot, "resetting device");
        let path = self.identity.node.join("reset");
        self.write_node_attribute(&path, "1");
        self.cache.invalidate_all();
    }

    /// Remove the device, rescan the bus and report whether it came back.
    pub fn recycle(&mut self) -> bool {
        let slot = self.identity.slot.clone();

        info!(slot = %slot, "removing device");
        let remove = self.identity.node.join("remove");
        self.write_node_attribute(&remove, "1");

        info!(slot = %slot, "rescanning bus");
        let rescan = self.backend.config().rescan_path();
        self.write_node_attribute(&rescan, "1");

        let back = self.backend.exists(&self.identity.node);
        self.cache.invalidate_all();

        if back {
            info!(slot = %slot, "device is back");
        } else {
            error!(slot = %slot, "device did not come back after rescan");
        }
        back
    }
}

impl fmt::Display for PciDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.backend.host().is_some() {
            "PciDevice[Remote]"
        } else {
            "PciDevice"
        };
        write!(
            f,
            "<{kind} slot={} port={} vendor={:04x} device={:04x}",
            self.identity.slot,
            self.port(),
            self.identity.vendor,
            self.identity.device
        )?;
        if let Some(host) = self.backend.host() {
            write!(f, " host={host}")?;
        }
        f.write_str(">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockDevice};
    use crate::config::HostConfig;

    const SLOT: &str = "0000:01:00.0";
    const PORT: &str = "0000:00:1c.0";

    /// An x4 gen3 endpoint behind root port 00:1c.0 with working link registers.
    fn endpoint() -> (Arc<MockBackend>, PciDevice) {
        let mock = Arc::new(MockBackend::new(HostConfig::default()));
        mock.add_device(
            MockDevice::new(SLOT, 0x8086, 0x1533)
                .port(PORT)
                .max_link_speed("8.0 GT/s PCIe")
                .max_link_width("4"),
        );
        mock.set_register("CAP_EXP+02.W", "0002");
        mock.set_register("CAP_EXP+0c.L", "0700e443");
        mock.set_register("CAP_EXP+12.W", "3042");
        mock.set_register("CAP_EXP+10.W", "0001");
        mock.set_register("CAP_EXP+30.W", "0005");
        let dev = PciDevice::new(SLOT, 0x8086, 0x1533, mock.clone());
        (mock, dev)
    }

    fn fill_cache(dev: &PciDevice) {
        dev.link_status();
        dev.link_capabilities();
        dev.max_speed();
        dev.max_width();
        dev.link_speed();
        dev.link_width();
    }

    #[test]
    fn port_is_parent_of_link_target() {
        let (_mock, dev) = endpoint();
        assert_eq!(dev.port(), PORT);
        assert_eq!(
            dev.to_string(),
            "<PciDevice slot=0000:01:00.0 port=0000:00:1c.0 vendor=8086 device=1533>"
        );
    }

    #[test]
    fn remote_summary_names_the_host() {
        let mock = Arc::new(MockBackend::new(HostConfig::default()).with_host("bench-01"));
        mock.add_device(MockDevice::new(SLOT, 0x10ee, 0x7024));
        let dev = PciDevice::new(SLOT, 0x10ee, 0x7024, mock);
        assert_eq!(
            dev.to_string(),
            "<PciDevice[Remote] slot=0000:01:00.0 port=pci0000:00 vendor=10ee device=7024 host=bench-01>"
        );
    }

    #[test]
    fn link_properties_decode_and_memoize() {
        let (mock, dev) = endpoint();
        assert!(dev.cache().is_empty());

        assert_eq!(dev.max_speed(), LinkSpeed::LS8_0);
        assert_eq!(dev.max_width(), LinkWidth::X4);
        assert_eq!(dev.link_speed(), LinkSpeed::LS5_0);
        assert_eq!(dev.link_width(), LinkWidth::X4);
        assert_eq!(dev.link_capabilities().unwrap().port_number, 7);
        assert!(dev.link_status().unwrap().dll_active);

        let calls = mock.tool_calls().len();
        fill_cache(&dev);
        assert_eq!(mock.tool_calls().len(), calls);
        assert_eq!(dev.cache().cached().len(), 6);

        // Link registers of an endpoint are read through its port.
        assert!(mock
            .tool_calls()
            .iter()
            .filter(|call| call.mnemonic == "CAP_EXP+12.W")
            .all(|call| call.target == PORT));
    }

    #[test]
    fn missing_capability_is_unknown() {
        let mock = Arc::new(MockBackend::new(HostConfig::default()));
        mock.add_device(MockDevice::new(SLOT, 0x1234, 0x5678));
        let dev = PciDevice::new(SLOT, 0x1234, 0x5678, mock);

        assert_eq!(dev.link_status(), None);
        assert_eq!(dev.link_capabilities(), None);
        assert_eq!(dev.max_speed(), LinkSpeed::Unknown);
        assert_eq!(dev.max_width(), LinkWidth::Unknown);
        assert_eq!(dev.link_speed(), LinkSpeed::Unknown);
        assert_eq!(dev.link_width(), LinkWidth::Unknown);
    }

    #[test]
    fn max_values_fall_back_to_attributes() {
        let (mock, dev) = endpoint();
        mock.clear_register("CAP_EXP+0c.L");
        assert_eq!(dev.max_speed(), LinkSpeed::LS8_0);
        assert_eq!(dev.max_width(), LinkWidth::X4);
    }

    #[test]
    fn retrain_sets_bit_five_and_preserves_the_rest() {
        let (mock, mut dev) = endpoint();
        mock.set_register("CAP_EXP+10.W", "0043");
        fill_cache(&dev);

        assert!(dev.retrain_link());
        assert_eq!(
            mock.tool_writes(),
            vec![crate::backend::ToolCall {
                target: PORT.to_string(),
                mnemonic: "CAP_EXP+10.W=0063".to_string(),
            }]
        );
        assert!(dev.cache().is_empty());
    }

    #[test]
    fn retrain_twice_invalidates_both_times() {
        let (mock, mut dev) = endpoint();
        fill_cache(&dev);
        assert!(dev.retrain_link());
        assert!(dev.cache().is_empty());

        fill_cache(&dev);
        assert!(dev.retrain_link());
        assert!(dev.cache().is_empty());
        assert_eq!(mock.tool_writes().len(), 2);
    }

    #[test]
    fn retrain_fails_closed_without_pcie_capability() {
        let (mock, mut dev) = endpoint();
        mock.clear_register("CAP_EXP+02.W");
        assert!(!dev.retrain_link());
        assert!(mock.tool_writes().is_empty());
    }

    #[test]
    fn retrain_reports_unreadable_link_control() {
        let (mock, mut dev) = endpoint();
        mock.clear_register("CAP_EXP+10.W");
        assert!(!dev.retrain_link());
        assert!(mock.tool_writes().is_empty());
    }

    #[test]
    fn set_speed_clamps_to_max() {
        let (mock, mut dev) = endpoint();
        assert_eq!(dev.max_speed(), LinkSpeed::LS8_0);

        assert!(dev.set_speed(LinkSpeed::LS32_0));
        let writes = mock.tool_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].mnemonic, "CAP_EXP+30.W=0003");
        assert_eq!(writes[0].target, PORT);
        assert_eq!(writes[1].mnemonic, "CAP_EXP+10.W=0021");
        assert!(dev.cache().is_empty());
    }

    #[test]
    fn set_speed_keeps_upper_control2_bits() {
        let (mock, mut dev) = endpoint();
        mock.set_register("CAP_EXP+30.W", "0a75");
        assert!(dev.set_speed(LinkSpeed::LS2_5));
        assert_eq!(mock.tool_writes()[0].mnemonic, "CAP_EXP+30.W=0a71");
    }

    #[test]
    fn set_speed_failure_modes() {
        let (mock, mut dev) = endpoint();
        assert!(!dev.set_speed(LinkSpeed::Unknown));

        mock.clear_register("CAP_EXP+30.W");
        assert!(!dev.set_speed(LinkSpeed::LS5_0));

        mock.set_register("CAP_EXP+30.W", "0003");
        mock.clear_register("CAP_EXP+02.W");
        assert!(!dev.set_speed(LinkSpeed::LS5_0));
        assert!(mock.tool_writes().is_empty());
    }

    #[test]
    fn root_port_targets_itself() {
        let (mock, mut dev) = endpoint();
        mock.set_register("CAP_EXP+02.W", "0042");
        assert!(dev.retrain_link());
        assert_eq!(mock.tool_writes()[0].target, SLOT);
    }

    #[test]
    fn reset_writes_attribute_and_invalidates() {
        let (mock, mut dev) = endpoint();
        fill_cache(&dev);
        dev.reset();
        assert_eq!(
            mock.attribute_writes(),
            vec![(PathBuf::from("/sys/bus/pci/devices/0000:01:00.0/reset"), "1".to_string())]
        );
        assert!(dev.cache().is_empty());
    }

    #[test]
    fn recycle_brings_device_back() {
        let (mock, mut dev) = endpoint();
        fill_cache(&dev);
        assert!(dev.recycle());
        assert!(dev.cache().is_empty());
        assert_eq!(
            mock.attribute_writes(),
            vec![
                (PathBuf::from("/sys/bus/pci/devices/0000:01:00.0/remove"), "1".to_string()),
                (PathBuf::from("/sys/bus/pci/rescan"), "1".to_string()),
            ]
        );
    }

    #[test]
    fn recycle_reports_missing_device() {
        let (mock, mut dev) = endpoint();
        mock.set_rescan_restores(false);
        fill_cache(&dev);
        assert!(!dev.recycle());
        assert!(dev.cache().is_empty());
        assert_eq!(dev.max_width(), LinkWidth::X4);
    }
}
