//! # Per-instance IPC endpoint naming.
//!
//! Every supervised instance gets its own endpoint so several instances can
//! share a host:
//!
//! - **Unix**: `$TMPDIR/launchvisor-<instance>.sock` (Unix domain socket)
//! - **Windows**: `\\.\pipe\launchvisor-<instance>` (named pipe)
//!
//! Instance identifiers are limited to ASCII alphanumerics, `.`, `_` and `-`
//! so they can be embedded in a path or pipe name verbatim.

use std::fmt;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use crate::error::TransportError;

const PREFIX: &str = "launchvisor";
const MAX_INSTANCE_LEN: usize = 64;

/// Address of one supervisor's IPC server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    instance: String,
    #[cfg(unix)]
    path: PathBuf,
    #[cfg(windows)]
    pipe_name: String,
}

impl Endpoint {
    /// Derives the default endpoint for `instance`.
    pub fn for_instance(instance: &str) -> Result<Self, TransportError> {
        validate_instance(instance)?;
        Ok(Self {
            instance: instance.to_string(),
            #[cfg(unix)]
            path: std::env::temp_dir().join(format!("{PREFIX}-{instance}.sock")),
            #[cfg(windows)]
            pipe_name: format!(r"\\.\pipe\{PREFIX}-{instance}"),
        })
    }

    /// Places the socket for `instance` inside `dir` instead of the temp dir.
    #[cfg(unix)]
    pub fn in_dir(dir: &Path, instance: &str) -> Result<Self, TransportError> {
        validate_instance(instance)?;
        Ok(Self {
            instance: instance.to_string(),
            path: dir.join(format!("{PREFIX}-{instance}.sock")),
        })
    }

    /// Instance identifier this endpoint belongs to.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Socket file path.
    #[cfg(unix)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Named pipe name.
    #[cfg(windows)]
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(unix)]
        {
            write!(f, "{}", self.path.display())
        }
        #[cfg(windows)]
        {
            write!(f, "{}", self.pipe_name)
        }
    }
}

fn validate_instance(id: &str) -> Result<(), TransportError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_INSTANCE_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(TransportError::InvalidInstance { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_is_part_of_the_name() {
        let a = Endpoint::for_instance("capture-1").unwrap();
        let b = Endpoint::for_instance("capture-2").unwrap();
        assert_ne!(a, b);
        assert!(a.to_string().contains("launchvisor-capture-1"));
        assert_eq!(a.instance(), "capture-1");
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        for bad in ["", "..", "a/b", "a b", r"a\b", &"x".repeat(65)] {
            let err = Endpoint::for_instance(bad).unwrap_err();
            assert_eq!(err.as_label(), "transport_invalid_instance", "{bad:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn in_dir_places_socket() {
        let ep = Endpoint::in_dir(Path::new("/run/app"), "main").unwrap();
        assert_eq!(ep.path(), Path::new("/run/app/launchvisor-main.sock"));
    }
}
