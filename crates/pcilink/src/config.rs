use std::env;
use std::path::PathBuf;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/pci";
pub const DEFAULT_SETPCI: &str = "setpci";
pub const DEFAULT_DOMAIN: &str = "0000";

/// Where a host keeps its PCI device tree and how its registers are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Root of the PCI bus in sysfs (`/sys/bus/pci`).
    pub sysfs_root: PathBuf,
    /// Register access tool, invoked as `<setpci> -s <target> <mnemonic>`.
    pub setpci: String,
    /// PCI domain prefixed onto slots given as `bus:device.function`.
    pub domain: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            setpci: DEFAULT_SETPCI.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `PCILINK_SYSFS_ROOT`, `PCILINK_SETPCI` and `PCILINK_DOMAIN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        if let Some(root) = var("PCILINK_SYSFS_ROOT") {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(setpci) = var("PCILINK_SETPCI") {
            config.setpci = setpci;
        }
        if let Some(domain) = var("PCILINK_DOMAIN") {
            config.domain = domain.trim().to_string();
        }
        config
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_setpci(mut self, setpci: impl Into<String>) -> Self {
        self.setpci = setpci.into();
        self
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.sysfs_root.join("devices")
    }

    pub fn device_node(&self, slot: &str) -> PathBuf {
        self.devices_dir().join(slot)
    }

    /// Bus-wide attribute that triggers re-enumeration.
    pub fn rescan_path(&self) -> PathBuf {
        self.sysfs_root.join("rescan")
    }

    /// Canonicalize a slot to `<domain>:<bus>:<device>.<function>`.
    ///
    /// Slots that already carry a domain are returned unchanged.
    pub fn normalize_slot(&self, slot: &str) -> String {
        let slot = slot.trim();
        if slot.matches(':').count() >= 2 {
            slot.to_string()
        } else {
            format!("{}:{slot}", self.domain)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn defaults_point_at_sysfs() {
        let config = HostConfig::default();
        assert_eq!(config.devices_dir(), Path::new("/sys/bus/pci/devices"));
        assert_eq!(config.rescan_path(), Path::new("/sys/bus/pci/rescan"));
        assert_eq!(
            config.device_node("0000:01:00.0"),
            Path::new("/sys/bus/pci/devices/0000:01:00.0")
        );
    }

    #[test]
    fn env_overrides_ignore_empty_values() {
        let vars: HashMap<&str, &str> = [
            ("PCILINK_SYSFS_ROOT", "/tmp/fake-sys"),
            ("PCILINK_SETPCI", ""),
            ("PCILINK_DOMAIN", "0001"),
        ]
        .into_iter()
        .collect();
        let config = HostConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.sysfs_root, PathBuf::from("/tmp/fake-sys"));
        assert_eq!(config.setpci, DEFAULT_SETPCI);
        assert_eq!(config.domain, "0001");
    }

    #[test]
    fn slots_without_domain_get_prefixed() {
        let config = HostConfig::default();
        assert_eq!(config.normalize_slot("01:00.0"), "0000:01:00.0");
        assert_eq!(config.normalize_slot("0000:01:00.0"), "0000:01:00.0");
        assert_eq!(config.normalize_slot(" 3a:00.1\n"), "0000:3a:00.1");
        assert_eq!(config.normalize_slot("0002:01:00.0"), "0002:01:00.0");
    }
}
