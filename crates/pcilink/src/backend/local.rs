use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::Backend;
use crate::config::HostConfig;
use crate::error::{BackendError, Result};

/// Direct file I/O on the local device tree plus local invocation of the register tool.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    config: HostConfig,
}

impl LocalBackend {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl Backend for LocalBackend {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn read_attribute(&self, path: &Path) -> Result<String> {
        debug!(path = %path.display(), "reading attribute");
        fs::read_to_string(path).map_err(|err| BackendError::io("read", path, err))
    }

    fn write_attribute(&self, path: &Path, value: &str) -> Result<()> {
        debug!(path = %path.display(), value, "writing attribute");
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|err| BackendError::io("open", path, err))?;
        file.write_all(value.as_bytes())
            .map_err(|err| BackendError::io("write", path, err))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).map_err(|err| BackendError::io("readlink", path, err))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(path).map_err(|err| BackendError::io("list", path, err))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BackendError::io("list", path, err))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn run_capability_tool(&self, target: &str, mnemonic: &str) -> Result<String> {
        let program = &self.config.setpci;
        let command_line = format!("{program} -s {target} {mnemonic}");
        debug!(command = %command_line, "running capability tool");

        let output = Command::new(program)
            .arg("-s")
            .arg(target)
            .arg(mnemonic)
            .output()
            .map_err(|source| BackendError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| BackendError::NotUtf8(command_line))
    }
}
