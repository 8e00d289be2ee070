//! Per-room process supervisor.
//!
//! Owns one child process and its lifecycle state machine. Stdout is decoded
//! line by line and classified against the server's log signatures; commands
//! reach the child's stdin only through the bounded queue drained by the
//! driver task. State lives in a watch channel so rooms, pumps and tests can
//! wait on transitions without polling.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use hearth_process::ServerState;

use crate::staging::{DownloadId, DownloadStore, StagingError};

const COMMAND_QUEUE_DEPTH: usize = 10;

fn backup_expiry() -> chrono::Duration {
    chrono::Duration::days(30)
}

// [20:41:05] [Server thread/INFO]: Done (14.132s)! For help, type "help"
fn running_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[.+:.+:.+\] \[Server thread/INFO\]: Done \(.*\)! For help, type "help""#)
            .unwrap()
    })
}

// [20:41:32] [Server thread/INFO]: Stopping server
fn stopping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[.+:.+:.+\] \[Server thread/INFO\]: Stopping server").unwrap()
    })
}

/// How to spawn the child. Rooms build java invocations from config; tests
/// use plain shell commands.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
}

impl LaunchSpec {
    /// The standard invocation for a room's server jar.
    pub fn java(java_bin: &str, heap_mb: u32, jar_path: &std::path::Path) -> Self {
        let dir = jar_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            program: java_bin.to_string(),
            args: vec![
                format!("-Xmx{heap_mb}M"),
                "-jar".to_string(),
                jar_path.display().to_string(),
                "nogui".to_string(),
            ],
            dir,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Log(String),
    State(ServerState),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("server is not closed (state {0})")]
    NotClosed(ServerState),
    #[error("server not started")]
    NotStarted,
    #[error("failed to spawn server process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("archive failed: {0}")]
    Archive(String),
}

pub struct Supervisor {
    spec: LaunchSpec,
    state_tx: watch::Sender<ServerState>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    cmd_tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl Supervisor {
    pub fn new(spec: LaunchSpec, events_tx: mpsc::UnboundedSender<SupervisorEvent>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ServerState::Closed);
        Arc::new(Self {
            spec,
            state_tx,
            events_tx,
            cmd_tx: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    // The event is queued before the watch value flips, so anyone woken by
    // the watch change will find the matching event already in the stream.
    fn transition(&self, next: ServerState) {
        let _ = self.events_tx.send(SupervisorEvent::State(next));
        self.state_tx.send_replace(next);
    }

    fn emit_log(&self, line: String) {
        let _ = self.events_tx.send(SupervisorEvent::Log(line));
    }

    /// Spawns the child and the reader/driver tasks. Legal only from `Closed`.
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        // The Closed check and the flip to Starting happen under the command
        // slot lock so concurrent callers serialize; only one can win.
        let mut slot = self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.state();
        if current != ServerState::Closed {
            return Err(SupervisorError::NotClosed(current));
        }

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .current_dir(&self.spec.dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(SupervisorError::NotStarted)?;
        let stdout = child.stdout.take().ok_or(SupervisorError::NotStarted)?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(COMMAND_QUEUE_DEPTH);
        *slot = Some(cmd_tx);

        self.transition(ServerState::Starting);
        drop(slot);

        // Single stdout reader, so line order is preserved.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // Every line is forwarded; classification happens after.
                this.emit_log(line.clone());
                this.classify(&line);
            }
        });

        // Driver: drains the command queue into stdin and watches for exit.
        // Exit forces Closed regardless of prior state.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    maybe_cmd = cmd_rx.recv() => {
                        let Some(cmd) = maybe_cmd else {
                            break child.wait().await;
                        };
                        if let Err(e) = stdin.write_all(cmd.as_bytes()).await {
                            this.emit_log(format!("[hearth] stdin write failed: {e}"));
                        }
                    }
                    status = child.wait() => break status,
                }
            };

            *this.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
            match status {
                Ok(st) if !st.success() => {
                    tracing::warn!(status = %st, "server process exited abnormally");
                    this.emit_log(format!("[hearth] server process exited abnormally: {st}"));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to reap server process");
                    this.emit_log(format!("[hearth] failed to reap server process: {e}"));
                }
                Ok(_) => {}
            }
            this.transition(ServerState::Closed);
        });

        Ok(())
    }

    // The running signature only fires while Starting, the stopping
    // signature only while Running; other lines never change state.
    fn classify(&self, line: &str) {
        match self.state() {
            ServerState::Starting if running_re().is_match(line) => {
                self.transition(ServerState::Running);
            }
            ServerState::Running if stopping_re().is_match(line) => {
                self.transition(ServerState::Stopping);
            }
            _ => {}
        }
    }

    /// Queues a command for the child's stdin, appending a newline if the
    /// text lacks one. Legal only while Starting or Running.
    pub async fn send_command(&self, text: &str) -> Result<(), SupervisorError> {
        if !matches!(self.state(), ServerState::Starting | ServerState::Running) {
            return Err(SupervisorError::NotStarted);
        }
        let tx = self
            .cmd_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SupervisorError::NotStarted)?;

        let mut cmd = text.to_string();
        if !cmd.ends_with('\n') {
            cmd.push('\n');
        }
        tx.send(cmd).await.map_err(|_| SupervisorError::NotStarted)
    }

    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.send_command("stop").await
    }

    /// Archives the working directory into the staging store. Legal only
    /// while `Closed`; the supervisor shows `Zipping` for the duration and
    /// returns to `Closed` whether or not archiving succeeded.
    pub async fn zip(
        &self,
        store: &DownloadStore,
        name: &str,
    ) -> Result<DownloadId, SupervisorError> {
        {
            let _slot = self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner());
            let current = self.state();
            if current != ServerState::Closed {
                return Err(SupervisorError::NotClosed(current));
            }
            self.transition(ServerState::Zipping);
        }

        // Archiving and hashing are file-bound; both stay off the executor.
        let result = async {
            let (staged, id) = store.put(name, backup_expiry())?;
            let dir = self.spec.dir.clone();
            tokio::task::spawn_blocking(move || {
                let staged = crate::archive::zip_dir(&dir, staged)
                    .map_err(|e| SupervisorError::Archive(e.to_string()))?;
                staged.finish()?;
                Ok::<_, SupervisorError>(())
            })
            .await
            .map_err(|e| SupervisorError::Archive(e.to_string()))??;
            Ok(id)
        }
        .await;

        self.transition(ServerState::Closed);
        result
    }
}
