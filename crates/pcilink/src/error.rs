use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Failure of a single backend primitive.
///
/// These never cross the device boundary: [`crate::PciDevice`] and the discovery functions fold
/// them into `None`, [`crate::LinkSpeed::Unknown`] or `false` after logging them.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_status(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("output of `{0}` is not valid UTF-8")]
    NotUtf8(String),
}

impl BackendError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackendError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure means the path simply is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// Problems with a device's `uevent` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UeventError {
    #[error("missing {0} key")]
    MissingKey(&'static str),

    #[error("malformed PCI_ID {0:?} (expected VVVV:DDDD)")]
    MalformedId(String),
}
