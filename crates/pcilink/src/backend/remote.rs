use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::Backend;
use crate::config::HostConfig;
use crate::error::{BackendError, Result};

/// Captured result of one remote shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when the command was killed by a signal or the channel dropped.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// An already-established command channel to a remote host.
///
/// The session is owned by the caller: [`RemoteBackend`] only issues commands through it and
/// never connects, authenticates or disconnects. Timeouts are the session's business as well.
pub trait RemoteSession: Send + Sync {
    /// Host identifier shown in device summaries.
    fn host(&self) -> &str;

    /// Run `command` through the remote shell, blocking until it finishes.
    fn run(&self, command: &str) -> io::Result<CommandOutput>;
}

impl<S: RemoteSession + ?Sized> RemoteSession for Arc<S> {
    fn host(&self) -> &str {
        (**self).host()
    }

    fn run(&self, command: &str) -> io::Result<CommandOutput> {
        (**self).run(command)
    }
}

impl<S: RemoteSession + ?Sized> RemoteSession for Box<S> {
    fn host(&self) -> &str {
        (**self).host()
    }

    fn run(&self, command: &str) -> io::Result<CommandOutput> {
        (**self).run(command)
    }
}

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let is_plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:+=,@%".contains(c));
    if is_plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// The backend primitives re-expressed as shell commands over a [`RemoteSession`].
#[derive(Debug)]
pub struct RemoteBackend<S> {
    session: S,
    config: HostConfig,
}

impl<S: RemoteSession> RemoteBackend<S> {
    pub fn new(session: S, config: HostConfig) -> Self {
        Self { session, config }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn run(&self, command: String) -> Result<String> {
        let host = self.session.host();
        debug!(host, command = %command, "==>");

        let output = self
            .session
            .run(&command)
            .map_err(|source| BackendError::Spawn {
                program: format!("remote session to {host}"),
                source,
            })?;
        debug!(host, status = ?output.status, stdout = %output.stdout.trim(), "<==");

        if output.success() {
            Ok(output.stdout)
        } else {
            Err(BackendError::CommandFailed {
                command,
                code: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

impl<S: RemoteSession + std::fmt::Debug> Backend for RemoteBackend<S> {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn host(&self) -> Option<&str> {
        Some(self.session.host())
    }

    fn read_attribute(&self, path: &Path) -> Result<String> {
        self.run(format!("cat {}", quote_path(path)))
    }

    fn write_attribute(&self, path: &Path, value: &str) -> Result<()> {
        let path = quote_path(path);
        self.run(format!(
            "test -e {path} && echo {} > {path}",
            shell_quote(value)
        ))
        .map(|_| ())
    }

    fn exists(&self, path: &Path) -> bool {
        self.run(format!("test -e {}", quote_path(path))).is_ok()
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let out = self.run(format!("readlink {}", quote_path(path)))?;
        Ok(PathBuf::from(out.trim()))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let out = self.run(format!("ls -1 {}", quote_path(path)))?;
        let mut names: Vec<String> = out.split_whitespace().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    fn run_capability_tool(&self, target: &str, mnemonic: &str) -> Result<String> {
        self.run(format!(
            "{} -s {} {}",
            shell_quote(&self.config.setpci),
            shell_quote(target),
            shell_quote(mnemonic)
        ))
    }
}
