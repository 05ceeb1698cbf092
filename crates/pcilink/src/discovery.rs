//! Finding devices in a host's PCI device tree.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::device::PciDevice;
use crate::uevent::parse_uevent;

/// Every device under `<sysfs root>/devices`, in slot order.
///
/// Nodes whose `uevent` cannot be read or parsed are skipped. An unreadable devices directory
/// yields an empty list.
pub fn enumerate(backend: Arc<dyn Backend>) -> Vec<PciDevice> {
    let dir = backend.config().devices_dir();
    let entries = match backend.list_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot list devices: {err}");
            return Vec::new();
        }
    };

    let devices: Vec<PciDevice> = entries
        .iter()
        .filter_map(|entry| from_node(&dir.join(entry), Arc::clone(&backend)))
        .collect();
    debug!(count = devices.len(), "enumerated devices");
    devices
}

/// The device at `slot`, which may omit the domain (`01:00.0`).
pub fn get(slot: &str, backend: Arc<dyn Backend>) -> Option<PciDevice> {
    let slot = backend.config().normalize_slot(slot);
    let node = backend.config().device_node(&slot);
    if !backend.exists(&node) {
        debug!(slot = %slot, "no such device");
        return None;
    }
    from_node(&node, backend)
}

/// Build a device from the `uevent` attribute of its node.
pub fn from_node(node: &Path, backend: Arc<dyn Backend>) -> Option<PciDevice> {
    let text = match backend.read_attribute(&node.join("uevent")) {
        Ok(text) => text,
        Err(err) => {
            warn!("skipping {}: {err}", node.display());
            return None;
        }
    };
    match parse_uevent(&text) {
        Ok(uevent) => Some(PciDevice::new(
            &uevent.slot,
            uevent.vendor,
            uevent.device,
            backend,
        )),
        Err(err) => {
            warn!("skipping {}: {err}", node.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockDevice};
    use crate::config::HostConfig;

    fn bus() -> Arc<MockBackend> {
        let mock = Arc::new(MockBackend::new(HostConfig::default()));
        mock.add_device(MockDevice::new("0000:00:1c.0", 0x8086, 0xa110));
        mock.add_device(MockDevice::new("0000:01:00.0", 0x144d, 0xa808).port("0000:00:1c.0"));
        mock
    }

    #[test]
    fn enumerates_in_slot_order() {
        let devices = enumerate(bus());
        let slots: Vec<&str> = devices.iter().map(|dev| dev.slot()).collect();
        assert_eq!(slots, ["0000:00:1c.0", "0000:01:00.0"]);
        assert_eq!(devices[1].vendor(), 0x144d);
        assert_eq!(devices[1].device(), 0xa808);
        assert_eq!(devices[1].port(), "0000:00:1c.0");
    }

    #[test]
    fn enumerate_skips_broken_nodes() {
        let mock = bus();
        mock.set_file(
            "/sys/bus/pci/devices/0000:00:1c.0/uevent",
            "PCI_SLOT_NAME=0000:00:1c.0\n",
        );
        let devices = enumerate(mock);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].slot(), "0000:01:00.0");
    }

    #[test]
    fn enumerate_without_devices_dir_is_empty() {
        let mock = Arc::new(MockBackend::new(HostConfig::default()));
        mock.remove_path(Path::new("/sys/bus/pci/devices"));
        assert!(enumerate(mock).is_empty());
    }

    #[test]
    fn get_accepts_short_slots() {
        let mock = bus();
        let short = get("01:00.0", mock.clone()).unwrap();
        let full = get("0000:01:00.0", mock.clone()).unwrap();
        assert_eq!(short.slot(), full.slot());
        assert_eq!(short.to_string(), full.to_string());

        assert!(get("02:00.0", mock).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn local_tree() {
        use crate::backend::LocalBackend;
        use std::fs;
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("bus/pci");
        let real = tmp.path().join("devices/pci0000:00/0000:00:01.0/0000:02:00.0");
        fs::create_dir_all(&real).unwrap();
        fs::create_dir_all(root.join("devices")).unwrap();
        fs::write(
            real.join("uevent"),
            "DRIVER=xhci_hcd\nPCI_ID=1B21:1242\nPCI_SLOT_NAME=0000:02:00.0\n",
        )
        .unwrap();
        symlink(&real, root.join("devices/0000:02:00.0")).unwrap();

        let backend = Arc::new(LocalBackend::new(
            HostConfig::default().with_sysfs_root(&root),
        ));
        let devices = enumerate(backend.clone());
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor(), 0x1b21);
        assert_eq!(devices[0].port(), "0000:00:01.0");

        let dev = get("02:00.0", backend).unwrap();
        assert_eq!(
            dev.to_string(),
            "<PciDevice slot=0000:02:00.0 port=0000:00:01.0 vendor=1b21 device=1242>"
        );
    }
}
