//! # Start-up decision: normal start or launcher mode.
//!
//! [`check`] reads the persisted [`State`] and decides whether the current
//! process must become a supervisor for another binary. It touches nothing but
//! the filesystem (read-only), so it can run before any runtime is built.
//!
//! ## Decision sequence
//! ```text
//! state file absent              ─► normal
//! prefer_entry_binary            ─► normal
//! active version/path empty      ─► normal
//! active_version == current      ─► normal
//! resolved target missing        ─► normal  (partial update, don't escalate)
//! target == current executable   ─► normal
//! otherwise                      ─► launcher(target, active_version)
//! ```
//!
//! "Same executable" compares absolute, lexically normalized paths. Symlinks and
//! bind mounts are not resolved.

use std::path::{Component, Path, PathBuf};

use crate::error::StateError;
use crate::state::store::{State, load, state_path};

/// Outcome of [`check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    /// True when the current process must supervise `target_binary_path`.
    pub should_be_launcher: bool,
    /// Absolute binary to supervise (launcher mode only).
    pub target_binary_path: Option<PathBuf>,
    /// Version of the binary to supervise (launcher mode only).
    pub target_version: Option<String>,
    /// State as loaded; `None` when the file was absent.
    pub state: Option<State>,
}

impl CheckResult {
    fn normal(state: Option<State>) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}

/// Decides between normal start and launcher mode.
///
/// # Errors
/// Returns the [`StateError`] from loading when the file exists but cannot be
/// read or parsed. The caller decides whether to fall back to defaults.
pub fn check(
    app_data: &Path,
    current_version: &str,
    current_exe: &Path,
) -> Result<CheckResult, StateError> {
    let state = match load(&state_path(app_data)) {
        Ok(s) => s,
        Err(StateError::NotFound { .. }) => return Ok(CheckResult::normal(None)),
        Err(e) => return Err(e),
    };

    if state.prefer_entry_binary
        || state.active_version.is_empty()
        || state.active_binary_path.is_empty()
        || state.active_version == current_version
    {
        return Ok(CheckResult::normal(Some(state)));
    }

    let target = resolve_binary_path(app_data, &state.active_binary_path);
    if !target.is_file() {
        return Ok(CheckResult::normal(Some(state)));
    }
    if target == absolute(current_exe) {
        return Ok(CheckResult::normal(Some(state)));
    }

    Ok(CheckResult {
        should_be_launcher: true,
        target_binary_path: Some(target),
        target_version: Some(state.active_version.clone()),
        state: Some(state),
    })
}

/// Resolves a recorded binary path: relative paths are taken against `app_data`,
/// then the result is made absolute and lexically normalized.
pub fn resolve_binary_path(app_data: &Path, raw: &str) -> PathBuf {
    let raw = Path::new(raw);
    if raw.is_absolute() {
        absolute(raw)
    } else {
        absolute(&app_data.join(raw))
    }
}

fn absolute(p: &Path) -> PathBuf {
    let abs = std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
    normalize(&abs)
}

fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(comp);
                }
            }
            other => out.push(other),
        }
    }
    out
}
