use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use pcilink::{CommandOutput, RemoteSession};

/// Runs each command through the system `ssh` client with key authentication.
///
/// `ssh` runs in batch mode: a missing or rejected key fails the command rather than prompting.
#[derive(Debug, Clone)]
pub struct SshSession {
    host: String,
    user: String,
    key: PathBuf,
    program: String,
}

impl SshSession {
    pub fn new(host: String, user: String, key: PathBuf) -> Self {
        Self {
            host,
            user,
            key,
            program: "ssh".to_string(),
        }
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(&self.key)
            .args(["-o", "BatchMode=yes", "-l"])
            .arg(&self.user)
            .arg(&self.host)
            .arg("--")
            .arg(remote)
            .stdin(Stdio::null());
        cmd
    }
}

impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> io::Result<CommandOutput> {
        let output = self.command(command).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
