use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Backend;
use crate::config::HostConfig;
use crate::error::{BackendError, Result};

/// One invocation of the register access tool seen by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub target: String,
    pub mnemonic: String,
}

impl ToolCall {
    pub fn is_write(&self) -> bool {
        self.mnemonic.contains('=')
    }
}

/// Description of a device to plant in a [`MockBackend`] tree.
#[derive(Debug, Clone)]
pub struct MockDevice {
    slot: String,
    vendor: u16,
    device: u16,
    port: Option<String>,
    max_link_speed: Option<String>,
    max_link_width: Option<String>,
}

impl MockDevice {
    pub fn new(slot: &str, vendor: u16, device: u16) -> Self {
        Self {
            slot: slot.to_string(),
            vendor,
            device,
            port: None,
            max_link_speed: None,
            max_link_width: None,
        }
    }

    /// Slot of the upstream port the device hangs off.
    pub fn port(mut self, port: &str) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn max_link_speed(mut self, text: &str) -> Self {
        self.max_link_speed = Some(text.to_string());
        self
    }

    pub fn max_link_width(mut self, text: &str) -> Self {
        self.max_link_width = Some(text.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct Subtree {
    files: BTreeMap<PathBuf, String>,
    links: BTreeMap<PathBuf, PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl Subtree {
    fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.links.contains_key(path) || self.dirs.contains(path)
    }

    /// Move everything at or below `root` into a new subtree.
    fn split_off(&mut self, root: &Path) -> Subtree {
        let mut out = Subtree::default();
        self.files.retain(|path, value| {
            let keep = !path.starts_with(root);
            if !keep {
                out.files.insert(path.clone(), value.clone());
            }
            keep
        });
        self.links.retain(|path, target| {
            let keep = !path.starts_with(root);
            if !keep {
                out.links.insert(path.clone(), target.clone());
            }
            keep
        });
        self.dirs.retain(|path| {
            let keep = !path.starts_with(root);
            if !keep {
                out.dirs.insert(path.clone());
            }
            keep
        });
        out
    }

    fn merge(&mut self, other: Subtree) {
        self.files.extend(other.files);
        self.links.extend(other.links);
        self.dirs.extend(other.dirs);
    }
}

#[derive(Debug)]
struct MockState {
    tree: Subtree,
    /// Device nodes removed through their `remove` attribute, waiting for a rescan.
    detached: Vec<Subtree>,
    rescan_restores: bool,
    registers: BTreeMap<String, String>,
    target_registers: BTreeMap<(String, String), String>,
    tool_calls: Vec<ToolCall>,
    attribute_writes: Vec<(PathBuf, String)>,
}

/// In-memory device tree and register file.
///
/// Register values are kept as the hex text the tool would print, keyed by read mnemonic
/// (`CAP_EXP+10.W`), either for every target or for one target slot. Writing a device's
/// `remove` attribute detaches its node; writing the bus `rescan` attribute re-attaches every
/// detached node unless [`MockBackend::set_rescan_restores`] turned that off.
#[derive(Debug)]
pub struct MockBackend {
    config: HostConfig,
    host: Option<String>,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(config: HostConfig) -> Self {
        let mut tree = Subtree::default();
        tree.dirs.insert(config.sysfs_root.clone());
        tree.dirs.insert(config.devices_dir());
        tree.files.insert(config.rescan_path(), String::new());

        Self {
            config,
            host: None,
            state: Mutex::new(MockState {
                tree,
                detached: Vec::new(),
                rescan_restores: true,
                registers: BTreeMap::new(),
                target_registers: BTreeMap::new(),
                tool_calls: Vec::new(),
                attribute_writes: Vec::new(),
            }),
        }
    }

    /// Report `host` as the remote host identifier, like a remote backend would.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: MockDevice) {
        let node = self.config.device_node(&device.slot);
        let parent = device.port.as_deref().unwrap_or("pci0000:00");
        let link = PathBuf::from(format!(
            "../../../devices/pci0000:00/{parent}/{}",
            device.slot
        ));
        let uevent = format!(
            "DRIVER=mock\nPCI_CLASS=10802\nPCI_ID={:04X}:{:04X}\nPCI_SUBSYS_ID={:04X}:0000\nPCI_SLOT_NAME={}\n",
            device.vendor, device.device, device.vendor, device.slot
        );

        let mut state = self.state();
        let tree = &mut state.tree;
        tree.dirs.insert(node.clone());
        tree.links.insert(node.clone(), link);
        tree.files.insert(node.join("uevent"), uevent);
        tree.files.insert(node.join("remove"), String::new());
        tree.files.insert(node.join("reset"), String::new());
        if let Some(speed) = device.max_link_speed {
            tree.files.insert(node.join("max_link_speed"), speed);
        }
        if let Some(width) = device.max_link_width {
            tree.files.insert(node.join("max_link_width"), width);
        }
    }

    pub fn set_file(&self, path: impl Into<PathBuf>, contents: &str) {
        self.state().tree.files.insert(path.into(), contents.to_string());
    }

    pub fn remove_path(&self, path: &Path) {
        let _ = self.state().tree.split_off(path);
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.state().tree.files.get(path).cloned()
    }

    /// Register value answered for every target.
    pub fn set_register(&self, mnemonic: &str, value: &str) {
        self.state()
            .registers
            .insert(mnemonic.to_string(), value.to_string());
    }

    /// Register value answered only for `target`; takes precedence over [`Self::set_register`].
    pub fn set_target_register(&self, target: &str, mnemonic: &str, value: &str) {
        self.state()
            .target_registers
            .insert((target.to_string(), mnemonic.to_string()), value.to_string());
    }

    pub fn clear_register(&self, mnemonic: &str) {
        let mut state = self.state();
        state.registers.remove(mnemonic);
        state.target_registers.retain(|(_, m), _| m != mnemonic);
    }

    pub fn register(&self, target: &str, mnemonic: &str) -> Option<String> {
        let state = self.state();
        state
            .target_registers
            .get(&(target.to_string(), mnemonic.to_string()))
            .or_else(|| state.registers.get(mnemonic))
            .cloned()
    }

    pub fn set_rescan_restores(&self, restores: bool) {
        self.state().rescan_restores = restores;
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.state().tool_calls.clone()
    }

    /// Write mnemonics issued so far, e.g. `CAP_EXP+10.W=0021`.
    pub fn tool_writes(&self) -> Vec<ToolCall> {
        self.state()
            .tool_calls
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    pub fn attribute_writes(&self) -> Vec<(PathBuf, String)> {
        self.state().attribute_writes.clone()
    }

    fn not_found(op: &'static str, path: &Path) -> BackendError {
        BackendError::io(op, path, io::Error::from(io::ErrorKind::NotFound))
    }
}

impl Backend for MockBackend {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn read_attribute(&self, path: &Path) -> Result<String> {
        self.state()
            .tree
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found("read", path))
    }

    fn write_attribute(&self, path: &Path, value: &str) -> Result<()> {
        let mut state = self.state();
        if !state.tree.files.contains_key(path) {
            return Err(Self::not_found("open", path));
        }
        state
            .attribute_writes
            .push((path.to_path_buf(), value.to_string()));

        if path == self.config.rescan_path() {
            if state.rescan_restores {
                let detached = std::mem::take(&mut state.detached);
                for subtree in detached {
                    state.tree.merge(subtree);
                }
            }
        } else if path.file_name().is_some_and(|name| name == "remove") {
            if let Some(node) = path.parent() {
                let subtree = state.tree.split_off(node);
                state.detached.push(subtree);
            }
        } else {
            state.tree.files.insert(path.to_path_buf(), value.to_string());
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state().tree.contains(path)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        self.state()
            .tree
            .links
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found("readlink", path))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let state = self.state();
        if !state.tree.dirs.contains(path) {
            return Err(Self::not_found("list", path));
        }

        let tree = &state.tree;
        let names: BTreeSet<String> = tree
            .files
            .keys()
            .chain(tree.links.keys())
            .chain(tree.dirs.iter())
            .filter(|entry| entry.parent() == Some(path))
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names.into_iter().collect())
    }

    fn run_capability_tool(&self, target: &str, mnemonic: &str) -> Result<String> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.tool_calls.push(ToolCall {
            target: target.to_string(),
            mnemonic: mnemonic.to_string(),
        });

        let command = format!("{} -s {target} {mnemonic}", self.config.setpci);
        let unknown = |command: String| BackendError::CommandFailed {
            command,
            code: Some(1),
            stderr: "Capability not found".to_string(),
        };

        let (register, value) = match mnemonic.split_once('=') {
            Some((register, value)) => (register, Some(value)),
            None => (mnemonic, None),
        };
        let key = (target.to_string(), register.to_string());

        match value {
            None => state
                .target_registers
                .get(&key)
                .or_else(|| state.registers.get(register))
                .map(|value| format!("{value}\n"))
                .ok_or_else(|| unknown(command)),
            Some(value) => {
                if let Some(slot) = state.target_registers.get_mut(&key) {
                    *slot = value.to_string();
                } else if let Some(slot) = state.registers.get_mut(register) {
                    *slot = value.to_string();
                } else {
                    return Err(unknown(command));
                }
                Ok(String::new())
            }
        }
    }
}
