//! # Durable launcher state.
//!
//! [`State`] is the only persisted entity. It records which version is active,
//! which one is the known-good backup, and the tuning knobs of the supervisor.
//!
//! ## File format
//! ```text
//! {
//!   "active_version": "2.0",
//!   "active_binary_path": "versions/2.0/app",
//!   "backup_version": "1.9",
//!   "backup_binary_path": "versions/1.9/app",
//!   "prefer_entry_binary": false,
//!   "startup_timeout": 60,
//!   "max_retries": 3,
//!   "last_update_time": "2026-10-19T08:00:00Z",
//!   "failure_count": 0
//! }
//! ```
//!
//! ## Rules
//! - [`save`] writes to a sibling temp file and renames it over the target
//! - [`load`] never repairs a corrupt file; it returns [`StateError::Corrupt`]
//! - missing fields take their [`State::default`] value

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// File name of the state record inside the app-data directory.
pub const STATE_FILE_NAME: &str = "launcher-state.json";

/// Persisted launcher state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    /// Version the launcher should be running (empty = no target).
    pub active_version: String,
    /// Binary of the active version; relative paths resolve against app-data.
    pub active_binary_path: String,
    /// Previously known-good version.
    pub backup_version: String,
    /// Binary of the backup version.
    pub backup_binary_path: String,
    /// Always run the originally deployed binary, ignoring version records.
    pub prefer_entry_binary: bool,
    /// Handshake bound in seconds.
    pub startup_timeout: u64,
    /// Consecutive failures tolerated before a rollback.
    pub max_retries: u32,
    /// When the active/backup records last changed.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Consecutive failed start attempts of the active version.
    pub failure_count: u32,
}

impl Default for State {
    /// Default state:
    ///
    /// - `startup_timeout = 60s`
    /// - `max_retries = 3`
    /// - everything else empty / zero
    fn default() -> Self {
        Self {
            active_version: String::new(),
            active_binary_path: String::new(),
            backup_version: String::new(),
            backup_binary_path: String::new(),
            prefer_entry_binary: false,
            startup_timeout: 60,
            max_retries: 3,
            last_update_time: None,
            failure_count: 0,
        }
    }
}

impl State {
    /// Handshake bound as a [`Duration`].
    #[inline]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }

    /// True if a backup binary is recorded (existence is not checked).
    #[inline]
    pub fn has_backup(&self) -> bool {
        !self.backup_binary_path.is_empty()
    }

    /// True if the target-defining fields differ from `other`.
    ///
    /// Only `active_version`, `active_binary_path` and `prefer_entry_binary`
    /// count; counters and timestamps do not.
    pub fn target_differs(&self, other: &State) -> bool {
        self.active_version != other.active_version
            || self.active_binary_path != other.active_binary_path
            || self.prefer_entry_binary != other.prefer_entry_binary
    }

    /// Swaps the active and backup records and clears the failure counter.
    pub fn swap_active_and_backup(&mut self) {
        std::mem::swap(&mut self.active_version, &mut self.backup_version);
        std::mem::swap(&mut self.active_binary_path, &mut self.backup_binary_path);
        self.failure_count = 0;
        self.last_update_time = Some(Utc::now());
    }
}

/// Returns the state file path for an app-data directory.
pub fn state_path(app_data: &Path) -> PathBuf {
    app_data.join(STATE_FILE_NAME)
}

/// Reads the state at `path`.
///
/// # Errors
/// - [`StateError::NotFound`] if the file is absent
/// - [`StateError::Corrupt`] if it does not parse
/// - [`StateError::Io`] for any other read failure
pub fn load(path: &Path) -> Result<State, StateError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StateError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&raw).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `state` to `path` as indented JSON.
///
/// The parent directory is created when missing. The write goes to a temp file
/// next to the target which is then renamed over it.
pub fn save(state: &State, path: &Path) -> Result<(), StateError> {
    let io_err = |source: io::Error| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    let body = serde_json::to_vec_pretty(state).map_err(|e| io_err(io::Error::other(e)))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(io_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| STATE_FILE_NAME.to_string());
    let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let written = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&body)?;
        f.write_all(b"\n")?;
        f.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(e)
    })
}
