//! Execution backends: how device-tree attributes and capability registers of one host are
//! reached.
//!
//! A [`crate::PciDevice`] is bound to exactly one backend when it is discovered and keeps it for
//! its whole life, so nothing above this layer branches on local vs. remote.

mod local;
mod mock;
mod remote;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::HostConfig;
use crate::error::Result;

pub use local::LocalBackend;
pub use mock::{MockBackend, MockDevice, ToolCall};
pub use remote::{shell_quote, CommandOutput, RemoteBackend, RemoteSession};

/// Primitive operations on a host's PCI device tree.
///
/// Every primitive reports failure through its `Result`; implementations never panic on a
/// missing attribute or a failing tool.
pub trait Backend: fmt::Debug + Send + Sync {
    fn config(&self) -> &HostConfig;

    /// Identifier of the remote host, `None` for the local machine.
    fn host(&self) -> Option<&str> {
        None
    }

    /// Contents of an attribute file.
    fn read_attribute(&self, path: &Path) -> Result<String>;

    /// Write `value` to an existing attribute file. Missing attributes are not created.
    fn write_attribute(&self, path: &Path, value: &str) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Target of a symbolic link, as stored in the link (possibly relative).
    fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Entry names of a directory, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Run the register access tool against `target` (a slot) with `mnemonic`
    /// (`<space>+<offset>.<width>[=<hex>]`) and return its stdout.
    fn run_capability_tool(&self, target: &str, mnemonic: &str) -> Result<String>;
}
