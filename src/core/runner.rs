//! # Runner: supervises one target binary with handshake, retry and rollback.
//!
//! The [`Runner`] owns the IPC [`Server`], the event bus, the in-memory
//! [`State`] and the current [`ChildProcess`]. Everything that mutates state
//! happens on the control loop; the IPC handler only forwards handshake
//! signals through a channel.
//!
//! ## Control loop
//! ```text
//! loop {
//!   ├─► cancelled? ───────────────────────────────────────► return Ok
//!   ├─► spawn(target, env)
//!   │     └─ io error ─────────────────────────────┐
//!   ├─► await_handshake(startup_timeout)           │
//!   │     ├─ Success  → reset failure_count        │
//!   │     │    └─► supervise: child exit / cancel / listener failure
//!   │     │          └─ exit → reload state: changed → hot-swap, loop
//!   │     │                                  same    → return Ok
//!   │     ├─ Crashed  ─────────────────────────────┤
//!   │     ├─ TimedOut → kill ──────────────────────┤
//!   │     └─ Cancelled → graceful stop → return Ok │
//!   │                                              ▼
//!   └─► re-read state file
//!         ├─ target rewritten   → adopt it, loop (failure not booked)
//!         └─ failure_count += 1 on the file's copy, save, then
//!              ├─ below max_retries → backoff, same target
//!              ├─ backup available  → swap active/backup, persist, loop
//!              └─ otherwise         → Err(RollbackUnavailable)
//! }
//! ```
//!
//! State writes always start from the file's current contents, so a target
//! the child records while it runs is never overwritten.
//!
//! ## Graceful stop
//! `Shutdown { reason, grace_period_seconds }` is broadcast to every peer,
//! then the runner waits on the child's exit notification. The grace window
//! starts before the broadcast, so a peer that stopped reading cannot stall
//! the stop. On timeout the child is killed exactly once.
//!
//! ## Example
//! ```rust,no_run
//! use launchvisor::{EntryBinary, Runner, RunnerConfig};
//!
//! # async fn demo() -> Result<(), launchvisor::LauncherError> {
//! let runner = Runner::builder("/var/lib/app", EntryBinary::current("1.9")?)
//!     .instance_id("app")
//!     .config(RunnerConfig::default())
//!     .build()?;
//! runner.run().await
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::RunnerConfig;
use crate::core::child::ChildProcess;
use crate::core::env::SupervisionEnv;
use crate::core::handshake::{HandshakeOutcome, HandshakeSignal, await_handshake};
use crate::core::shutdown;
use crate::core::spawn::{CommandSpawner, LaunchTarget, Spawn};
use crate::error::{FailureKind, LauncherError};
use crate::events::{Bus, Event, EventKind};
use crate::ipc::{Connection, Endpoint, MessageHandler, Server};
use crate::protocol::{Message, MessageType, StartupFailed, StartupSuccess};
use crate::state::{CheckResult, State, load, resolve_binary_path, save, state_path};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Instance identifier used when none is configured.
pub const DEFAULT_INSTANCE_ID: &str = "main";

/// The originally deployed binary: the process that became the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryBinary {
    /// Version compiled into the entry binary.
    pub version: String,
    /// Absolute path of the entry binary.
    pub exe: PathBuf,
}

impl EntryBinary {
    /// Entry binary at `exe`.
    pub fn new(version: impl Into<String>, exe: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            exe: exe.into(),
        }
    }

    /// The current executable, reporting `version`.
    pub fn current(version: impl Into<String>) -> Result<Self, LauncherError> {
        let exe = std::env::current_exe().map_err(|source| LauncherError::Startup {
            path: PathBuf::from("<current executable>"),
            source,
        })?;
        Ok(Self::new(version, exe))
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recovery {
    Retry,
    Rollback,
    Exhausted { detail: String },
}

/// Decides between retry, rollback and giving up.
///
/// `failure_count` must already include the failure being handled. A rollback
/// is offered at most once per runner session until a handshake succeeds.
pub(crate) fn plan_recovery(state: &State, app_data: &Path, rollback_spent: bool) -> Recovery {
    if state.failure_count < state.max_retries {
        return Recovery::Retry;
    }
    if !state.has_backup() {
        return Recovery::Exhausted {
            detail: "no rollback configured (backup_binary_path is empty)".to_string(),
        };
    }
    if rollback_spent {
        return Recovery::Exhausted {
            detail: format!(
                "backup unusable: {} already failed after a rollback",
                state.backup_version
            ),
        };
    }
    let backup = resolve_binary_path(app_data, &state.backup_binary_path);
    if !backup.is_file() {
        return Recovery::Exhausted {
            detail: format!("backup unusable: {} does not exist", backup.display()),
        };
    }
    Recovery::Rollback
}

/// Configures a [`Runner`].
pub struct RunnerBuilder {
    app_data: PathBuf,
    entry: EntryBinary,
    instance_id: String,
    state: Option<State>,
    endpoint: Option<Endpoint>,
    cfg: RunnerConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Option<Arc<dyn Spawn>>,
}

impl RunnerBuilder {
    /// Instance identifier (names the IPC endpoint). Defaults to [`DEFAULT_INSTANCE_ID`].
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Starts from an already loaded state instead of reading the file.
    pub fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    /// Starts from the state captured by [`check`](crate::check).
    pub fn check_result(mut self, result: CheckResult) -> Self {
        self.state = result.state;
        self
    }

    /// Overrides the endpoint derived from the instance identifier.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Runner configuration.
    pub fn config(mut self, cfg: RunnerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Adds an event subscriber.
    pub fn subscriber(mut self, sub: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(sub);
        self
    }

    /// Replaces the default [`CommandSpawner`].
    pub fn spawner(mut self, spawner: impl Spawn) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Validates the configuration and builds the runner.
    ///
    /// Reads the state file when no state was supplied; an absent file yields
    /// [`State::default`].
    pub fn build(self) -> Result<Runner, LauncherError> {
        let endpoint = match self.endpoint {
            Some(ep) => ep,
            None => Endpoint::for_instance(&self.instance_id)?,
        };
        let state_path = state_path(&self.app_data);
        let state = match self.state {
            Some(s) => s,
            None => match load(&state_path) {
                Ok(s) => s,
                Err(e) if e.is_not_found() => State::default(),
                Err(e) => return Err(e.into()),
            },
        };

        Ok(Runner {
            env: SupervisionEnv::current(endpoint.instance(), self.entry.exe.clone()),
            bus: Bus::new(self.cfg.bus_capacity_clamped()),
            spawner: self
                .spawner
                .unwrap_or_else(|| Arc::new(CommandSpawner::forwarding_args())),
            token: CancellationToken::new(),
            app_data: self.app_data,
            entry: self.entry,
            endpoint,
            state_path,
            state,
            cfg: self.cfg,
            subscribers: self.subscribers,
            rollback_spent: false,
            attempt: 0,
        })
    }
}

/// Supervisor for one app-data directory.
pub struct Runner {
    app_data: PathBuf,
    state_path: PathBuf,
    state: State,
    entry: EntryBinary,
    env: SupervisionEnv,
    endpoint: Endpoint,
    cfg: RunnerConfig,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Arc<dyn Spawn>,
    token: CancellationToken,
    rollback_spent: bool,
    attempt: u32,
}

impl Runner {
    /// Starts configuring a runner for `app_data`.
    pub fn builder(app_data: impl Into<PathBuf>, entry: EntryBinary) -> RunnerBuilder {
        RunnerBuilder {
            app_data: app_data.into(),
            entry,
            instance_id: DEFAULT_INSTANCE_ID.to_string(),
            state: None,
            endpoint: None,
            cfg: RunnerConfig::default(),
            subscribers: Vec::new(),
            spawner: None,
        }
    }

    /// Token that stops the runner gracefully when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Endpoint children connect to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Target the next spawn would launch.
    pub fn target(&self) -> LaunchTarget {
        self.resolve_target()
    }

    /// Runs until the child exits with no new target, cancellation, or a fatal error.
    ///
    /// # Errors
    /// - [`LauncherError::RollbackUnavailable`] when the retry budget ran out
    ///   and no usable backup exists
    /// - [`LauncherError::State`] when the state file cannot be written or re-read
    /// - [`LauncherError::Transport`] when the endpoint cannot be bound or the
    ///   listener dies
    pub async fn run(mut self) -> Result<(), LauncherError> {
        let subs = SubscriberSet::new(std::mem::take(&mut self.subscribers), self.bus.clone());
        let listener_done = CancellationToken::new();
        let listener = self.subscriber_listener(subs, listener_done.clone());
        let signals = self
            .cfg
            .handle_os_signals
            .then(|| shutdown::cancel_on_signal(self.token.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(RunnerHandler {
            signals: tx,
            bus: self.bus.clone(),
        });
        let res = match Server::start(self.endpoint.clone(), handler).await {
            Ok(server) => {
                let res = self.control_loop(&server, rx).await;
                server.stop().await;
                res
            }
            Err(e) => Err(e.into()),
        };

        if let Some(handle) = signals {
            handle.abort();
        }
        listener_done.cancel();
        if let Ok(subs) = listener.await {
            subs.shutdown().await;
        }
        res
    }

    /// Forwards bus events to the subscriber set until `done`, then hands the set back.
    fn subscriber_listener(
        &self,
        subs: SubscriberSet,
        done: CancellationToken,
    ) -> JoinHandle<SubscriberSet> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => subs.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = done.cancelled() => break,
                }
            }
            subs
        })
    }

    async fn control_loop(
        &mut self,
        server: &Server,
        mut signals: mpsc::UnboundedReceiver<HandshakeSignal>,
    ) -> Result<(), LauncherError> {
        let mut target = self.resolve_target();
        loop {
            if self.token.is_cancelled() {
                self.publish(Event::new(EventKind::ShutdownRequested));
                return Ok(());
            }
            // leftovers from a previous child must not confirm this one
            while signals.try_recv().is_ok() {}

            self.attempt += 1;
            let mut child = match self.spawner.spawn(&target, &self.env) {
                Ok(child) => {
                    let mut ev = Event::new(EventKind::ChildSpawned)
                        .with_version(target.version.as_str())
                        .with_path(&target.path)
                        .with_attempt(self.attempt);
                    if let Some(pid) = child.pid() {
                        ev = ev.with_pid(pid);
                    }
                    self.publish(ev);
                    child
                }
                Err(e) => {
                    let failure = FailureKind::NeverStarted {
                        error: e.to_string(),
                    };
                    match self.recover(&target, failure).await? {
                        Some(next) => {
                            target = next;
                            continue;
                        }
                        None => return Ok(()),
                    }
                }
            };

            let timeout = self.state.startup_timeout();
            let failure =
                match await_handshake(&mut signals, &mut child, timeout, &self.token).await {
                    HandshakeOutcome::Success { pid, .. } => {
                        self.publish(
                            Event::new(EventKind::HandshakeSucceeded)
                                .with_version(target.version.as_str())
                                .with_pid(pid)
                                .with_attempt(self.attempt),
                        );
                        self.rollback_spent = false;
                        if self.state.failure_count > 0 {
                            self.clear_failures()?;
                        }
                        match self.supervise(server, &mut child, &target).await? {
                            Some(next) => {
                                target = next;
                                continue;
                            }
                            None => return Ok(()),
                        }
                    }
                    HandshakeOutcome::Crashed { exit, reported } => FailureKind::Crashed {
                        status: Some(exit.description),
                        reported,
                    },
                    HandshakeOutcome::TimedOut => {
                        child.kill();
                        let _ = child.wait().await;
                        FailureKind::TimedOut { timeout }
                    }
                    HandshakeOutcome::Cancelled => {
                        self.publish(Event::new(EventKind::ShutdownRequested));
                        self.stop_child(server, &mut child, &target).await;
                        return Ok(());
                    }
                };

            match self.recover(&target, failure).await? {
                Some(next) => target = next,
                None => return Ok(()),
            }
        }
    }

    /// Waits for a confirmed child to exit. Returns the next target on hot-swap.
    async fn supervise(
        &mut self,
        server: &Server,
        child: &mut ChildProcess,
        target: &LaunchTarget,
    ) -> Result<Option<LaunchTarget>, LauncherError> {
        let exit = tokio::select! {
            exit = child.wait() => exit,
            _ = self.token.cancelled() => {
                self.publish(Event::new(EventKind::ShutdownRequested));
                self.stop_child(server, child, target).await;
                return Ok(None);
            }
            err = server.failed() => {
                error!(error = %err, "ipc listener failed; stopping child");
                self.stop_child(server, child, target).await;
                return Err(err.into());
            }
        };
        self.publish(
            Event::new(EventKind::ChildExited)
                .with_version(target.version.as_str())
                .with_reason(exit.description),
        );
        self.reload()
    }

    /// Re-reads the state file after a child exit.
    fn reload(&mut self) -> Result<Option<LaunchTarget>, LauncherError> {
        let fresh = match load(&self.state_path) {
            Ok(s) => s,
            Err(e) if e.is_not_found() => {
                warn!(path = %self.state_path.display(), "state file vanished; keeping last known state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !fresh.target_differs(&self.state) {
            self.state = fresh;
            return Ok(None);
        }
        Ok(Some(self.adopt(fresh)))
    }

    /// Switches to a target written to the state file by someone else.
    fn adopt(&mut self, fresh: State) -> LaunchTarget {
        self.state = fresh;
        self.rollback_spent = false;
        let next = self.resolve_target();
        self.publish(
            Event::new(EventKind::TargetReloaded)
                .with_version(next.version.as_str())
                .with_path(&next.path),
        );
        next
    }

    /// Current file contents; the in-memory copy when the file vanished.
    fn read_current(&self) -> Result<State, LauncherError> {
        match load(&self.state_path) {
            Ok(s) => Ok(s),
            Err(e) if e.is_not_found() => Ok(self.state.clone()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resets the failure count on disk without touching the target fields,
    /// which the running child may have rewritten; the next reload sees them.
    fn clear_failures(&mut self) -> Result<(), LauncherError> {
        self.state.failure_count = 0;
        let mut disk = self.read_current()?;
        disk.failure_count = 0;
        save(&disk, &self.state_path)?;
        Ok(())
    }

    /// Books a failed attempt and decides what runs next (`None` when cancelled).
    async fn recover(
        &mut self,
        target: &LaunchTarget,
        last: FailureKind,
    ) -> Result<Option<LaunchTarget>, LauncherError> {
        let mut disk = self.read_current()?;
        let retarget = disk.target_differs(&self.state);
        if !retarget {
            disk.failure_count = disk.failure_count.saturating_add(1);
            save(&disk, &self.state_path)?;
        }

        let ev = match &last {
            FailureKind::NeverStarted { error } => {
                Event::new(EventKind::SpawnFailed).with_reason(error.as_str())
            }
            FailureKind::TimedOut { timeout } => {
                Event::new(EventKind::HandshakeTimedOut).with_timeout(*timeout)
            }
            FailureKind::Crashed { .. } => {
                Event::new(EventKind::HandshakeCrashed).with_reason(last.describe())
            }
        };
        let ev = ev
            .with_version(target.version.as_str())
            .with_path(&target.path)
            .with_attempt(self.attempt);

        // a target written while this one was failing replaces it; the
        // failure is not booked against the new target
        if retarget {
            self.publish(ev);
            return Ok(Some(self.adopt(disk)));
        }
        self.state = disk;
        let failures = self.state.failure_count;
        self.publish(ev.with_failures(failures));

        match plan_recovery(&self.state, &self.app_data, self.rollback_spent) {
            Recovery::Retry => {
                let delay = self.cfg.backoff.delay_after(failures);
                self.publish(
                    Event::new(EventKind::BackoffScheduled)
                        .with_version(target.version.as_str())
                        .with_attempt(self.attempt)
                        .with_failures(failures)
                        .with_delay(delay),
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(Some(target.clone())),
                    _ = self.token.cancelled() => {
                        self.publish(Event::new(EventKind::ShutdownRequested));
                        Ok(None)
                    }
                }
            }
            Recovery::Rollback => {
                let abandoned = self.state.active_version.clone();
                self.state.swap_active_and_backup();
                self.persist()?;
                self.rollback_spent = true;

                let next = self.resolve_target();
                self.publish(
                    Event::new(EventKind::RollbackPerformed)
                        .with_version(next.version.as_str())
                        .with_path(&next.path)
                        .with_reason(abandoned),
                );
                Ok(Some(next))
            }
            Recovery::Exhausted { detail } => Err(LauncherError::RollbackUnavailable {
                version: target.version.clone(),
                attempts: failures,
                last,
                detail,
            }),
        }
    }

    /// Broadcasts `Shutdown`, waits up to the grace window, then kills once.
    async fn stop_child(&self, server: &Server, child: &mut ChildProcess, target: &LaunchTarget) {
        if !child.is_running() {
            return;
        }
        let msg = Message::shutdown(
            self.cfg.shutdown_reason.clone(),
            self.cfg.grace_period_seconds(),
        );
        let grace = tokio::time::sleep(self.cfg.grace);
        tokio::pin!(grace);

        // a child that stopped reading may block the broadcast; the grace window covers it
        tokio::select! {
            res = server.broadcast(&msg) => {
                if let Err(e) = res {
                    debug!(error = %e, "shutdown broadcast incomplete");
                }
            }
            _ = child.wait() => {}
            _ = &mut grace => debug!("shutdown broadcast outlived the grace window"),
        }

        tokio::select! {
            biased;
            _ = child.wait() => {
                self.publish(
                    Event::new(EventKind::StoppedWithinGrace)
                        .with_version(target.version.as_str()),
                );
            }
            _ = &mut grace => {
                child.kill();
                self.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_version(target.version.as_str())
                        .with_timeout(self.cfg.grace),
                );
                let _ = child.wait().await;
            }
        }
    }

    /// Entry binary when preferred or when no active target is recorded;
    /// otherwise the resolved active binary.
    fn resolve_target(&self) -> LaunchTarget {
        let s = &self.state;
        if s.prefer_entry_binary || s.active_version.is_empty() || s.active_binary_path.is_empty()
        {
            return LaunchTarget {
                version: self.entry.version.clone(),
                path: self.entry.exe.clone(),
            };
        }
        LaunchTarget {
            version: s.active_version.clone(),
            path: resolve_binary_path(&self.app_data, &s.active_binary_path),
        }
    }

    fn persist(&self) -> Result<(), LauncherError> {
        save(&self.state, &self.state_path)?;
        Ok(())
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }
}

/// IPC dispatch for the supervisor side.
struct RunnerHandler {
    signals: mpsc::UnboundedSender<HandshakeSignal>,
    bus: Bus,
}

#[async_trait]
impl MessageHandler for RunnerHandler {
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        match msg.kind {
            MessageType::StartupSuccess => match msg.payload::<StartupSuccess>() {
                Ok(p) => {
                    let _ = self.signals.send(HandshakeSignal::Ready {
                        version: p.version,
                        pid: p.pid,
                    });
                }
                Err(e) => warn!(conn = conn.id(), error = %e, "malformed startup_success"),
            },
            MessageType::StartupFailed => {
                let error = msg
                    .payload::<StartupFailed>()
                    .map(|p| p.error)
                    .unwrap_or_else(|_| "unspecified startup failure".to_string());
                let _ = self.signals.send(HandshakeSignal::Failed { error });
            }
            MessageType::Heartbeat => {
                if let Err(e) = conn.send(&Message::new(MessageType::HeartbeatAck)).await {
                    debug!(conn = conn.id(), error = %e, "heartbeat ack failed");
                }
            }
            MessageType::ShutdownAck => debug!(conn = conn.id(), "child acknowledged shutdown"),
            MessageType::HeartbeatAck => {}
            MessageType::UpdateRequest => {
                debug!(conn = conn.id(), "ignoring deprecated update_request")
            }
            MessageType::Shutdown => {
                warn!(conn = conn.id(), "unexpected shutdown message from a child")
            }
        }
    }

    async fn on_connect(&self, conn: &Arc<Connection>) {
        self.bus
            .publish(Event::new(EventKind::PeerConnected).with_peer(conn.id()));
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        self.bus
            .publish(Event::new(EventKind::PeerDisconnected).with_peer(conn.id()));
    }
}

#[cfg(test)]
mod plan_tests {
    use super::*;

    fn state(failures: u32, max: u32, backup: &str) -> State {
        State {
            active_version: "2.0".into(),
            active_binary_path: "v2/bin".into(),
            backup_version: "1.0".into(),
            backup_binary_path: backup.into(),
            max_retries: max,
            failure_count: failures,
            ..State::default()
        }
    }

    #[test]
    fn retries_below_budget() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            plan_recovery(&state(2, 3, ""), dir.path(), false),
            Recovery::Retry
        );
    }

    #[test]
    fn rolls_back_when_budget_spent_and_backup_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("v1")).unwrap();
        std::fs::write(dir.path().join("v1/bin"), b"").unwrap();

        assert_eq!(
            plan_recovery(&state(3, 3, "v1/bin"), dir.path(), false),
            Recovery::Rollback
        );
    }

    #[test]
    fn exhausted_without_usable_backup() {
        let dir = tempfile::tempdir().unwrap();

        let Recovery::Exhausted { detail } = plan_recovery(&state(3, 3, ""), dir.path(), false)
        else {
            panic!("expected exhaustion");
        };
        assert!(detail.contains("empty"));

        let Recovery::Exhausted { detail } =
            plan_recovery(&state(3, 3, "v1/bin"), dir.path(), false)
        else {
            panic!("expected exhaustion");
        };
        assert!(detail.contains("does not exist"));
    }

    #[test]
    fn second_rollback_in_a_session_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("v1")).unwrap();
        std::fs::write(dir.path().join("v1/bin"), b"").unwrap();

        let Recovery::Exhausted { detail } =
            plan_recovery(&state(3, 3, "v1/bin"), dir.path(), true)
        else {
            panic!("expected exhaustion");
        };
        assert!(detail.starts_with("backup unusable"), "{detail}");
        assert!(!detail.contains("no rollback configured"));
    }

    #[test]
    fn zero_retries_decides_immediately() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            plan_recovery(&state(1, 0, ""), dir.path(), false),
            Recovery::Exhausted { .. }
        ));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use crate::ipc::Client;
    use crate::policies::BackoffPolicy;

    fn sh(script: &str) -> io::Result<ChildProcess> {
        let child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .kill_on_drop(true)
            .spawn()?;
        Ok(ChildProcess::from_child(child))
    }

    /// Plays the child's side of the handshake from a test task.
    fn confirm(endpoint: Endpoint, version: String, pid: u32) {
        tokio::spawn(async move {
            let client = Client::connect(&endpoint, Duration::from_secs(2))
                .await
                .unwrap();
            client
                .send(&Message::startup_success(version, pid))
                .await
                .unwrap();
        });
    }

    struct Fixture {
        dir: tempfile::TempDir,
        endpoint: Endpoint,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = Endpoint::in_dir(dir.path(), "runner").unwrap();
            Self { dir, endpoint }
        }

        fn write_state(&self, state: &State) {
            save(state, &state_path(self.dir.path())).unwrap();
        }

        fn read_state(&self) -> State {
            load(&state_path(self.dir.path())).unwrap()
        }

        fn touch(&self, rel: &str) {
            let path = self.dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"").unwrap();
        }

        fn runner(&self, grace: Duration, spawner: impl Spawn) -> Runner {
            Runner::builder(self.dir.path(), EntryBinary::new("1.9", "/bin/sh"))
                .endpoint(self.endpoint.clone())
                .config(RunnerConfig {
                    grace,
                    backoff: BackoffPolicy::immediate(),
                    handle_os_signals: false,
                    ..RunnerConfig::default()
                })
                .spawner(spawner)
                .build()
                .unwrap()
        }
    }

    fn update_target(max_retries: u32) -> State {
        State {
            active_version: "2.0".into(),
            active_binary_path: "v2/bin".into(),
            startup_timeout: 30,
            max_retries,
            ..State::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        kinds
    }

    async fn wait_for(rx: &mut broadcast::Receiver<Event>, kind: EventKind) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while rx.recv().await.unwrap().kind != kind {}
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn crashes_without_backup_end_in_rollback_unavailable() {
        let fx = Fixture::new();
        fx.write_state(&update_target(2));

        let runner = fx.runner(Duration::from_secs(1), |_: &LaunchTarget, _: &SupervisionEnv| {
            sh("exit 1")
        });
        let mut rx = runner.subscribe();
        let err = runner.run().await.unwrap_err();

        match &err {
            LauncherError::RollbackUnavailable {
                version,
                attempts,
                last,
                ..
            } => {
                assert_eq!(version, "2.0");
                assert_eq!(*attempts, 2);
                assert!(matches!(last, FailureKind::Crashed { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.to_string().contains("no rollback configured"));
        assert_eq!(fx.read_state().failure_count, 2);

        let kinds = drain(&mut rx);
        let crashes = kinds
            .iter()
            .filter(|k| **k == EventKind::HandshakeCrashed)
            .count();
        assert_eq!(crashes, 2);
        assert!(kinds.contains(&EventKind::BackoffScheduled));
    }

    #[tokio::test]
    async fn exhausted_budget_rolls_back_to_backup() {
        let fx = Fixture::new();
        fx.touch("v1/bin");
        fx.write_state(&State {
            backup_version: "1.0".into(),
            backup_binary_path: "v1/bin".into(),
            ..update_target(2)
        });

        let endpoint = fx.endpoint.clone();
        let runner = fx.runner(
            Duration::from_secs(1),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                if t.version == "2.0" {
                    return sh("exit 1");
                }
                let child = sh("sleep 0.5")?;
                confirm(endpoint.clone(), t.version.clone(), child.pid().unwrap_or(0));
                Ok(child)
            },
        );
        let mut rx = runner.subscribe();
        runner.run().await.unwrap();

        let state = fx.read_state();
        assert_eq!(state.active_version, "1.0");
        assert_eq!(state.backup_version, "2.0");
        assert_eq!(state.failure_count, 0);
        assert!(state.last_update_time.is_some());

        let kinds = drain(&mut rx);
        assert!(kinds.contains(&EventKind::RollbackPerformed));
        assert!(kinds.contains(&EventKind::HandshakeSucceeded));
        assert!(kinds.contains(&EventKind::ChildExited));
    }

    #[tokio::test]
    async fn success_resets_failures_without_waiting_for_timeout() {
        let fx = Fixture::new();
        fx.write_state(&State {
            failure_count: 2,
            ..update_target(3)
        });

        let endpoint = fx.endpoint.clone();
        let runner = fx.runner(
            Duration::from_secs(1),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                let child = sh("sleep 0.3")?;
                confirm(endpoint.clone(), t.version.clone(), child.pid().unwrap_or(0));
                Ok(child)
            },
        );

        let started = Instant::now();
        runner.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(fx.read_state().failure_count, 0);
    }

    #[tokio::test]
    async fn silent_child_is_killed_on_timeout() {
        let fx = Fixture::new();
        fx.write_state(&State {
            startup_timeout: 1,
            ..update_target(1)
        });

        let runner = fx.runner(Duration::from_secs(1), |_: &LaunchTarget, _: &SupervisionEnv| {
            sh("sleep 30")
        });
        let mut rx = runner.subscribe();

        let started = Instant::now();
        let err = runner.run().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            err,
            LauncherError::RollbackUnavailable {
                last: FailureKind::TimedOut { .. },
                ..
            }
        ));
        assert!(drain(&mut rx).contains(&EventKind::HandshakeTimedOut));
        assert_eq!(fx.read_state().failure_count, 1);
    }

    #[tokio::test]
    async fn spawn_errors_count_as_failures() {
        let fx = Fixture::new();
        fx.write_state(&update_target(2));

        let runner = fx.runner(Duration::from_secs(1), |_: &LaunchTarget, _: &SupervisionEnv| -> io::Result<ChildProcess> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"))
        });
        let mut rx = runner.subscribe();
        let err = runner.run().await.unwrap_err();

        assert!(err.to_string().contains("never started"), "{err}");
        assert!(matches!(
            err,
            LauncherError::RollbackUnavailable {
                attempts: 2,
                last: FailureKind::NeverStarted { .. },
                ..
            }
        ));
        let spawn_failures = drain(&mut rx)
            .into_iter()
            .filter(|k| *k == EventKind::SpawnFailed)
            .count();
        assert_eq!(spawn_failures, 2);
    }

    #[tokio::test]
    async fn state_change_during_run_hot_swaps_target() {
        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let state_file = state_path(fx.dir.path());
        let endpoint = fx.endpoint.clone();
        let launched = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&launched);
        let runner = fx.runner(
            Duration::from_secs(1),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                record.lock().unwrap().push(t.version.clone());
                if t.version == "2.0" {
                    // the child asks for 3.0 while it runs
                    let mut next = load(&state_file).unwrap();
                    next.active_version = "3.0".into();
                    next.active_binary_path = "v3/bin".into();
                    save(&next, &state_file).unwrap();
                }
                let child = sh("sleep 0.3")?;
                confirm(endpoint.clone(), t.version.clone(), child.pid().unwrap_or(0));
                Ok(child)
            },
        );
        let mut rx = runner.subscribe();
        runner.run().await.unwrap();

        assert_eq!(*launched.lock().unwrap(), vec!["2.0", "3.0"]);
        assert!(drain(&mut rx).contains(&EventKind::TargetReloaded));
        assert_eq!(fx.read_state().active_version, "3.0");
    }

    #[tokio::test]
    async fn cancelled_before_start_spawns_nothing() {
        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let runner = fx.runner(Duration::from_secs(1), |_: &LaunchTarget, _: &SupervisionEnv| -> io::Result<ChildProcess> {
            panic!("must not spawn")
        });
        runner.cancellation_token().cancel();
        runner.run().await.unwrap();
    }

    #[tokio::test]
    async fn graceful_stop_within_grace_does_not_kill() {
        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let flag = fx.dir.path().join("stop.flag");
        let endpoint = fx.endpoint.clone();
        let runner = fx.runner(
            Duration::from_secs(5),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                let child = sh(&format!(
                    "while [ ! -f '{}' ]; do sleep 0.05; done",
                    flag.display()
                ))?;
                let (endpoint, version, flag) =
                    (endpoint.clone(), t.version.clone(), flag.clone());
                let pid = child.pid().unwrap_or(0);
                tokio::spawn(async move {
                    let client = Client::connect(&endpoint, Duration::from_secs(2))
                        .await
                        .unwrap();
                    client
                        .send(&Message::startup_success(version, pid))
                        .await
                        .unwrap();
                    while let Some(msg) = client.receive().await {
                        if msg.kind == MessageType::Shutdown {
                            let _ = client.send(&Message::new(MessageType::ShutdownAck)).await;
                            std::fs::write(&flag, b"").unwrap();
                        }
                    }
                });
                Ok(child)
            },
        );
        let token = runner.cancellation_token();
        let endpoint = fx.endpoint.clone();
        let mut rx = runner.subscribe();
        let run = tokio::spawn(runner.run());

        wait_for(&mut rx, EventKind::HandshakeSucceeded).await;

        // heartbeats are answered; deprecated update requests are ignored
        let peer = Client::connect(&endpoint, Duration::from_secs(2))
            .await
            .unwrap();
        peer
            .send(&Message::new(MessageType::UpdateRequest))
            .await
            .unwrap();
        peer
            .send(&Message::new(MessageType::Heartbeat))
            .await
            .unwrap();
        let ack = tokio::time::timeout(Duration::from_secs(5), peer.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.kind, MessageType::HeartbeatAck);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let kinds = drain(&mut rx);
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::StoppedWithinGrace));
        assert!(!kinds.contains(&EventKind::GraceExceeded));
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_exactly_once() {
        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let endpoint = fx.endpoint.clone();
        let runner = fx.runner(
            Duration::from_millis(200),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                let child = sh("sleep 30")?;
                confirm(endpoint.clone(), t.version.clone(), child.pid().unwrap_or(0));
                Ok(child)
            },
        );
        let token = runner.cancellation_token();
        let mut rx = runner.subscribe();
        let run = tokio::spawn(runner.run());

        wait_for(&mut rx, EventKind::HandshakeSucceeded).await;
        let cancelled_at = Instant::now();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));

        let kinds = drain(&mut rx);
        let kills = kinds
            .iter()
            .filter(|k| **k == EventKind::GraceExceeded)
            .count();
        assert_eq!(kills, 1);
        assert!(!kinds.contains(&EventKind::StoppedWithinGrace));
    }

    #[tokio::test]
    async fn target_recorded_by_child_survives_failure_reset() {
        let fx = Fixture::new();
        fx.write_state(&State {
            failure_count: 1,
            ..update_target(3)
        });

        let state_file = state_path(fx.dir.path());
        let endpoint = fx.endpoint.clone();
        let launched = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&launched);
        let runner = fx.runner(
            Duration::from_secs(1),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                record.lock().unwrap().push(t.version.clone());
                let child = sh("sleep 0.5")?;
                let pid = child.pid().unwrap_or(0);
                let (endpoint, version, state_file) =
                    (endpoint.clone(), t.version.clone(), state_file.clone());
                tokio::spawn(async move {
                    // 2.0 asks for 3.0 before confirming its own startup
                    if version == "2.0" {
                        let mut next = load(&state_file).unwrap();
                        next.active_version = "3.0".into();
                        next.active_binary_path = "v3/bin".into();
                        save(&next, &state_file).unwrap();
                    }
                    let client = Client::connect(&endpoint, Duration::from_secs(2))
                        .await
                        .unwrap();
                    client
                        .send(&Message::startup_success(version, pid))
                        .await
                        .unwrap();
                });
                Ok(child)
            },
        );
        runner.run().await.unwrap();

        assert_eq!(*launched.lock().unwrap(), vec!["2.0", "3.0"]);
        let state = fx.read_state();
        assert_eq!(state.active_version, "3.0");
        assert_eq!(state.failure_count, 0);
    }

    #[tokio::test]
    async fn cancel_during_handshake_does_not_wait_for_startup_timeout() {
        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let runner = fx.runner(
            Duration::from_millis(200),
            |_: &LaunchTarget, _: &SupervisionEnv| sh("sleep 30"),
        );
        let token = runner.cancellation_token();
        let mut rx = runner.subscribe();
        let run = tokio::spawn(runner.run());

        wait_for(&mut rx, EventKind::ChildSpawned).await;
        let cancelled_at = Instant::now();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));

        let kinds = drain(&mut rx);
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(
            kinds.contains(&EventKind::GraceExceeded)
                || kinds.contains(&EventKind::StoppedWithinGrace)
        );
        assert!(!kinds.contains(&EventKind::HandshakeTimedOut));
    }

    #[tokio::test]
    async fn peer_that_stopped_reading_cannot_stall_graceful_stop() {
        use crate::protocol::codec;
        use tokio::io::AsyncWriteExt;

        let fx = Fixture::new();
        fx.write_state(&update_target(3));

        let endpoint = fx.endpoint.clone();
        let runner = fx.runner(
            Duration::from_millis(300),
            move |t: &LaunchTarget, _: &SupervisionEnv| {
                let child = sh("sleep 30")?;
                confirm(endpoint.clone(), t.version.clone(), child.pid().unwrap_or(0));
                Ok(child)
            },
        );
        let token = runner.cancellation_token();
        let mut rx = runner.subscribe();
        let run = tokio::spawn(runner.run());

        wait_for(&mut rx, EventKind::HandshakeSucceeded).await;

        // heartbeats pile up acks the peer never reads until the socket buffer is full
        let mut raw = tokio::net::UnixStream::connect(fx.endpoint.path())
            .await
            .unwrap();
        let frame = codec::encode(&Message::new(MessageType::Heartbeat)).unwrap();
        let mut burst = Vec::new();
        for _ in 0..1024 {
            burst.extend_from_slice(&(frame.len() as u32).to_be_bytes());
            burst.extend_from_slice(&frame);
        }
        let flood = tokio::spawn(async move { while raw.write_all(&burst).await.is_ok() {} });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let cancelled_at = Instant::now();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        flood.abort();

        assert!(drain(&mut rx).contains(&EventKind::GraceExceeded));
    }
}
