//! # Spawning the supervised binary.
//!
//! [`Spawn`] is the seam between the runner and the OS. [`CommandSpawner`] is
//! the real thing; tests plug in closures.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::core::child::ChildProcess;
use crate::core::env::SupervisionEnv;

/// What the runner is about to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    /// Version string the child is expected to report.
    pub version: String,
    /// Absolute path of the binary.
    pub path: PathBuf,
}

impl fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.path.display())
    }
}

/// Starts a child for a target.
///
/// Implementations must mark the child with `env` (see [`SupervisionEnv::apply`])
/// so it can find the supervisor.
pub trait Spawn: Send + Sync + 'static {
    /// Starts the child. An error here counts as a failed attempt.
    fn spawn(&self, target: &LaunchTarget, env: &SupervisionEnv) -> io::Result<ChildProcess>;
}

impl<F> Spawn for F
where
    F: Fn(&LaunchTarget, &SupervisionEnv) -> io::Result<ChildProcess> + Send + Sync + 'static,
{
    fn spawn(&self, target: &LaunchTarget, env: &SupervisionEnv) -> io::Result<ChildProcess> {
        self(target, env)
    }
}

/// Runs the target binary directly with inherited stdio.
///
/// The child is killed if its handle is dropped.
#[derive(Debug, Clone, Default)]
pub struct CommandSpawner {
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl CommandSpawner {
    /// Spawner without extra arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner forwarding the current process arguments (minus `argv[0]`).
    pub fn forwarding_args() -> Self {
        Self::new().args(std::env::args_os().skip(1))
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of the child (inherited when unset).
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn command(&self, target: &LaunchTarget, env: &SupervisionEnv) -> Command {
        let mut cmd = Command::new(&target.path);
        cmd.args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        env.apply(&mut cmd);
        cmd
    }
}

impl Spawn for CommandSpawner {
    fn spawn(&self, target: &LaunchTarget, env: &SupervisionEnv) -> io::Result<ChildProcess> {
        let child = self.command(target, env).spawn()?;
        Ok(ChildProcess::from_child(child))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_environment_and_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");

        let target = LaunchTarget {
            version: "2.0".into(),
            path: PathBuf::from("/bin/sh"),
        };
        let env = SupervisionEnv::current("svc", "/bin/entry");
        let mut child = CommandSpawner::new()
            .arg("-c")
            .arg(format!(
                "echo \"$LAUNCHVISOR_SUPERVISED $LAUNCHVISOR_INSTANCE_ID $0\" > '{}'",
                out.display()
            ))
            .arg("--serve")
            .spawn(&target, &env)
            .unwrap();

        assert!(child.wait().await.success);
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "1 svc --serve");
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let target = LaunchTarget {
            version: "2.0".into(),
            path: PathBuf::from("/definitely/not/here"),
        };
        let env = SupervisionEnv::current("svc", "/bin/entry");
        let err = CommandSpawner::new().spawn(&target, &env).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
