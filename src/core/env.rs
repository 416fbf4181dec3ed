//! # Supervision environment.
//!
//! The runner marks every child it spawns with four variables:
//!
//! ```text
//! LAUNCHVISOR_SUPERVISED=1
//! LAUNCHVISOR_INSTANCE_ID=<instance>      → names the IPC endpoint
//! LAUNCHVISOR_SUPERVISOR_PID=<pid>
//! LAUNCHVISOR_SUPERVISOR_EXE=<path>
//! ```
//!
//! A child reads them back with [`SupervisionEnv::from_env`]: no marker means
//! "not supervised" (`Ok(None)`); a marker with missing or malformed companions
//! is an [`EnvError`], never a silent fallback to standalone mode.

use std::path::PathBuf;

use tokio::process::Command;

use crate::error::EnvError;
use crate::ipc::Endpoint;

/// Marker variable; its presence means the process runs under a supervisor.
pub const ENV_SUPERVISED: &str = "LAUNCHVISOR_SUPERVISED";
/// Instance identifier; selects the IPC endpoint.
pub const ENV_INSTANCE_ID: &str = "LAUNCHVISOR_INSTANCE_ID";
/// Process id of the supervisor.
pub const ENV_SUPERVISOR_PID: &str = "LAUNCHVISOR_SUPERVISOR_PID";
/// Executable of the supervisor (the entry binary).
pub const ENV_SUPERVISOR_EXE: &str = "LAUNCHVISOR_SUPERVISOR_EXE";

/// Identity a supervisor hands to its child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionEnv {
    /// Instance identifier shared by supervisor and child.
    pub instance_id: String,
    /// Supervisor process id.
    pub supervisor_pid: u32,
    /// Supervisor executable.
    pub supervisor_exe: PathBuf,
}

impl SupervisionEnv {
    /// Environment describing the current process as supervisor of `instance_id`.
    pub fn current(instance_id: impl Into<String>, supervisor_exe: impl Into<PathBuf>) -> Self {
        Self {
            instance_id: instance_id.into(),
            supervisor_pid: std::process::id(),
            supervisor_exe: supervisor_exe.into(),
        }
    }

    /// IPC endpoint this environment points at.
    pub fn endpoint(&self) -> Result<Endpoint, crate::TransportError> {
        Endpoint::for_instance(&self.instance_id)
    }

    /// Sets the four variables on `cmd`.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env(ENV_SUPERVISED, "1")
            .env(ENV_INSTANCE_ID, &self.instance_id)
            .env(ENV_SUPERVISOR_PID, self.supervisor_pid.to_string())
            .env(ENV_SUPERVISOR_EXE, &self.supervisor_exe);
    }

    /// Reads the variables of the current process.
    pub fn from_env() -> Result<Option<Self>, EnvError> {
        Self::from_vars(|name| std::env::var_os(name).map(|v| v.to_string_lossy().into_owned()))
    }

    /// Parses the variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Result<Option<Self>, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(marker) = lookup(ENV_SUPERVISED) else {
            return Ok(None);
        };
        if marker != "1" {
            return Err(EnvError::Invalid {
                var: ENV_SUPERVISED,
                value: marker,
            });
        }

        let instance_id = require(&lookup, ENV_INSTANCE_ID)?;
        if Endpoint::for_instance(&instance_id).is_err() {
            return Err(EnvError::Invalid {
                var: ENV_INSTANCE_ID,
                value: instance_id,
            });
        }

        let raw_pid = require(&lookup, ENV_SUPERVISOR_PID)?;
        let supervisor_pid = raw_pid.parse::<u32>().map_err(|_| EnvError::Invalid {
            var: ENV_SUPERVISOR_PID,
            value: raw_pid.clone(),
        })?;

        let supervisor_exe = PathBuf::from(require(&lookup, ENV_SUPERVISOR_EXE)?);

        Ok(Some(Self {
            instance_id,
            supervisor_pid,
            supervisor_exe,
        }))
    }

    /// Variables as key/value pairs, in the order [`apply`](Self::apply) sets them.
    pub fn vars(&self) -> [(&'static str, String); 4] {
        [
            (ENV_SUPERVISED, "1".to_string()),
            (ENV_INSTANCE_ID, self.instance_id.clone()),
            (ENV_SUPERVISOR_PID, self.supervisor_pid.to_string()),
            (
                ENV_SUPERVISOR_EXE,
                self.supervisor_exe.to_string_lossy().into_owned(),
            ),
        ]
    }
}

fn require<F>(lookup: &F, var: &'static str) -> Result<String, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EnvError::Missing { var }),
    }
}
