//! # Process bootstrap.
//!
//! [`launch`] is the first thing a self-updating binary calls in `main`:
//!
//! ```text
//! launch(opts)
//!   ├─ supervision env present ─────────────► RunNormally { supervision: Some(env) }
//!   ├─ check(app_data, version, exe)
//!   │    ├─ normal start ───────────────────► RunNormally { supervision: None }
//!   │    └─ launcher mode ──► Runner::run ──► Supervised (caller exits)
//!   └─ errors: corrupt state, malformed env, runner failure
//! ```
//!
//! A process that is itself supervised never becomes a launcher.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::RunnerConfig;
use crate::core::{CommandSpawner, DEFAULT_INSTANCE_ID, EntryBinary, Runner, SupervisionEnv};
use crate::error::LauncherError;
use crate::state::check;
use crate::subscribers::Subscribe;

/// Inputs to [`launch`].
pub struct LaunchOptions {
    /// Directory holding `launcher-state.json` and relative binary paths.
    pub app_data: PathBuf,
    /// Version of the running binary.
    pub version: String,
    /// Path of the running binary; `None` resolves the current executable.
    pub exe: Option<PathBuf>,
    /// Instance identifier naming the IPC endpoint.
    pub instance_id: String,
    /// Arguments for the child; `None` forwards this process's arguments.
    pub child_args: Option<Vec<OsString>>,
    /// Supervisor configuration (used only in launcher mode).
    pub config: RunnerConfig,
    /// Event subscribers (used only in launcher mode).
    pub subscribers: Vec<Arc<dyn Subscribe>>,
}

impl LaunchOptions {
    /// Options with defaults for everything but the app-data directory and version.
    pub fn new(app_data: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            app_data: app_data.into(),
            version: version.into(),
            exe: None,
            instance_id: DEFAULT_INSTANCE_ID.to_string(),
            child_args: None,
            config: RunnerConfig::default(),
            subscribers: Vec::new(),
        }
    }
}

/// What the caller should do after [`launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchDecision {
    /// Run the business logic in this process.
    ///
    /// `supervision` is set when a supervisor started this process; the caller
    /// should connect with [`Supervised`](crate::Supervised) and report readiness.
    RunNormally {
        /// Parsed supervision environment, if any.
        supervision: Option<SupervisionEnv>,
    },
    /// This process acted as supervisor and the runner finished cleanly.
    Supervised,
}

/// Decides between normal start and launcher mode, running the supervisor in
/// the latter case.
///
/// # Errors
/// - [`LauncherError::Env`] on a partial or malformed supervision environment
/// - [`LauncherError::State`] when the state file is corrupt or unreadable
/// - anything [`Runner::run`] returns in launcher mode
pub async fn launch(opts: LaunchOptions) -> Result<LaunchDecision, LauncherError> {
    let supervision = SupervisionEnv::from_env()?;
    launch_with(opts, supervision).await
}

async fn launch_with(
    opts: LaunchOptions,
    supervision: Option<SupervisionEnv>,
) -> Result<LaunchDecision, LauncherError> {
    if let Some(env) = supervision {
        info!(
            instance = %env.instance_id,
            supervisor_pid = env.supervisor_pid,
            "running under a supervisor"
        );
        return Ok(LaunchDecision::RunNormally {
            supervision: Some(env),
        });
    }

    let entry = match opts.exe {
        Some(exe) => EntryBinary::new(opts.version, exe),
        None => EntryBinary::current(opts.version)?,
    };
    let result = check(&opts.app_data, &entry.version, &entry.exe)?;
    if !result.should_be_launcher {
        return Ok(LaunchDecision::RunNormally { supervision: None });
    }

    info!(
        target_version = result.target_version.as_deref().unwrap_or("-"),
        current_version = %entry.version,
        "entering launcher mode"
    );
    let spawner = match opts.child_args {
        Some(args) => CommandSpawner::new().args(args),
        None => CommandSpawner::forwarding_args(),
    };
    let mut builder = Runner::builder(&opts.app_data, entry)
        .instance_id(opts.instance_id)
        .check_result(result)
        .config(opts.config)
        .spawner(spawner);
    for sub in opts.subscribers {
        builder = builder.subscriber(sub);
    }

    builder.build()?.run().await?;
    Ok(LaunchDecision::Supervised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::BackoffPolicy;
    use crate::state::{State, save, state_path};
    use crate::{FailureKind, StateError};

    fn options(dir: &std::path::Path, version: &str) -> LaunchOptions {
        LaunchOptions {
            exe: Some(PathBuf::from("/opt/app/entry")),
            instance_id: format!("launch-test-{}", std::process::id()),
            config: RunnerConfig {
                backoff: BackoffPolicy::immediate(),
                handle_os_signals: false,
                ..RunnerConfig::default()
            },
            ..LaunchOptions::new(dir, version)
        }
    }

    #[tokio::test]
    async fn supervised_child_runs_normally_without_checking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(state_path(dir.path()), b"{ not json").unwrap();

        let env = SupervisionEnv::current("svc", "/opt/app/entry");
        let decision = launch_with(options(dir.path(), "2.0"), Some(env.clone()))
            .await
            .unwrap();
        assert_eq!(
            decision,
            LaunchDecision::RunNormally {
                supervision: Some(env)
            }
        );
    }

    #[tokio::test]
    async fn absent_state_runs_normally() {
        let dir = tempfile::tempdir().unwrap();
        let decision = launch_with(options(dir.path(), "1.9"), None).await.unwrap();
        assert_eq!(decision, LaunchDecision::RunNormally { supervision: None });
    }

    #[tokio::test]
    async fn corrupt_state_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(state_path(dir.path()), b"{ not json").unwrap();

        let err = launch_with(options(dir.path(), "1.9"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LauncherError::State(StateError::Corrupt { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_target_without_backup_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        save(
            &State {
                active_version: "2.0".into(),
                active_binary_path: "/bin/sh".into(),
                max_retries: 1,
                startup_timeout: 5,
                ..State::default()
            },
            &state_path(dir.path()),
        )
        .unwrap();

        let opts = LaunchOptions {
            child_args: Some(vec!["-c".into(), "exit 3".into()]),
            ..options(dir.path(), "1.9")
        };
        let err = launch_with(opts, None).await.unwrap_err();
        assert!(matches!(
            err,
            LauncherError::RollbackUnavailable {
                last: FailureKind::Crashed { .. },
                ..
            }
        ));
    }
}
