//! A room binds one supervised server process to its profile and fans the
//! supervisor's log/state events out to live subscribers.
//!
//! Subscribers are plain string channels; WebSocket connections are adapted
//! onto one via `add_socket`, which also turns inbound text frames into
//! commands. Commands queue through a capacity-1 channel drained by a single
//! pump task per active run.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use hearth_process::{RoomId, RoomInfo, RoomSummary, ServerState, ServerType};

use crate::notify::Notifier;
use crate::profile::RoomProfile;
use crate::staging::{DownloadId, DownloadStore};
use crate::supervisor::{LaunchSpec, Supervisor, SupervisorError, SupervisorEvent};

/// Feed of per-room state changes consumed by the registry.
pub type StateFeed = mpsc::UnboundedSender<(RoomId, ServerState)>;

pub struct Room {
    id: RoomId,
    name: String,
    server_type: ServerType,
    version_id: String,
    jar_path: PathBuf,
    emails: RwLock<Vec<String>>,

    supervisor: Arc<Supervisor>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,

    cmd_tx: mpsc::Sender<String>,
    // Held by exactly one pump task while the server runs.
    cmd_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,

    notifier: Arc<dyn Notifier>,
}

impl Room {
    pub fn new(
        profile: RoomProfile,
        java_bin: &str,
        java_heap_mb: u32,
        notifier: Arc<dyn Notifier>,
        feed: Option<StateFeed>,
    ) -> Arc<Self> {
        let spec = LaunchSpec::java(java_bin, java_heap_mb, &profile.jar_path);
        Self::with_launch_spec(profile, spec, notifier, feed)
    }

    pub fn with_launch_spec(
        profile: RoomProfile,
        spec: LaunchSpec,
        notifier: Arc<dyn Notifier>,
        feed: Option<StateFeed>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(spec, events_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        let room = Arc::new(Self {
            id: profile.id,
            name: profile.name,
            server_type: profile.server_type,
            version_id: profile.version_id,
            jar_path: profile.jar_path,
            emails: RwLock::new(profile.emails),
            supervisor,
            subscribers: Mutex::new(Vec::new()),
            cmd_tx,
            cmd_rx: Arc::new(tokio::sync::Mutex::new(cmd_rx)),
            notifier,
        });

        Self::spawn_event_drain(&room, events_rx, feed);
        room
    }

    // Lives for the room's lifetime; holds only a weak handle so the room
    // can still be dropped.
    fn spawn_event_drain(
        room: &Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
        feed: Option<StateFeed>,
    ) {
        let weak = Arc::downgrade(room);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(room) = weak.upgrade() else { break };
                match event {
                    SupervisorEvent::Log(line) => room.broadcast(&line),
                    SupervisorEvent::State(state) => {
                        if let Some(feed) = &feed {
                            let _ = feed.send((room.id.clone(), state));
                        }
                        room.broadcast(state.as_str());
                        room.notify_state(state);
                    }
                }
            }
        });
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        self.supervisor.state()
    }

    /// Starts the server and the command pump. The pump drains the room's
    /// queue into the supervisor until it observes `Closed`; commands racing
    /// shutdown may be dropped.
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        self.supervisor.start()?;

        // The previous run's pump may still hold the receiver while it winds
        // down; queue behind it instead of leaving the new run pumpless. If
        // the run is already over by the time the lock is ours, the wait on
        // Closed resolves immediately.
        let cmd_rx = Arc::clone(&self.cmd_rx);
        let supervisor = Arc::clone(&self.supervisor);
        let mut state_rx = supervisor.subscribe();
        tokio::spawn(async move {
            let mut rx = cmd_rx.lock_owned().await;
            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        if supervisor.send_command(&cmd).await.is_err() {
                            break;
                        }
                    }
                    res = async {
                        state_rx.wait_for(|s| *s == ServerState::Closed).await.map(|_| ())
                    } => {
                        let _ = res;
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.supervisor.stop().await
    }

    /// Queues an operator command. Silently dropped when the server is
    /// closed; otherwise waits for queue space.
    pub async fn send_command(&self, cmd: String) {
        if self.state() == ServerState::Closed {
            return;
        }
        let _ = self.cmd_tx.send(cmd).await;
    }

    /// Archives the working directory into the staging store under a
    /// timestamped backup name.
    pub async fn zip(&self, store: &DownloadStore) -> Result<DownloadId, SupervisorError> {
        let name = format!(
            "backup-server-{}-{}",
            self.name,
            chrono::Utc::now().timestamp_millis()
        );
        self.supervisor.zip(store, &name).await
    }

    /// Registers a log/state sink.
    pub fn add_subscriber(&self, tx: mpsc::UnboundedSender<String>) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(tx);
    }

    /// Binds a WebSocket connection: outbound frames carry the fan-out,
    /// inbound text frames become commands.
    pub fn add_socket<S>(self: &Arc<Self>, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.add_subscriber(tx);
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if sink.send(Message::text(line)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let Ok(text) = msg.into_text() else { continue };
                let Some(room) = weak.upgrade() else { break };
                room.send_command(text.to_string()).await;
            }
        });
    }

    // Writes to every subscriber; failed ones are swap-removed afterwards.
    fn broadcast(&self, msg: &str) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut dead = Vec::new();
        for (i, tx) in subs.iter().enumerate() {
            if tx.send(msg.to_string()).is_err() {
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            subs.swap_remove(i);
        }
    }

    fn notify_state(&self, state: ServerState) {
        let (subject, body) = match state {
            ServerState::Running => (
                format!("hearth: server {} (id: {}) running", self.name, self.id),
                format!(
                    "Server {} (id: {}) is now running. If this is unexpected, log in to investigate.",
                    self.name, self.id
                ),
            ),
            ServerState::Closed => (
                format!("hearth: server {} (id: {}) closed", self.name, self.id),
                format!(
                    "Server {} (id: {}) has closed. If this is unexpected, log in to investigate.",
                    self.name, self.id
                ),
            ),
            _ => return,
        };

        let emails = self
            .emails
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Err(e) = self.notifier.send(&emails, &subject, &body) {
            tracing::warn!(room = %self.id, error = %e, "failed to send state notification");
        }
    }

    /// Appends addresses not already present. Matching is exact and
    /// case-sensitive.
    pub fn add_email(&self, addrs: &[String]) {
        let mut emails = self.emails.write().unwrap_or_else(|e| e.into_inner());
        for addr in addrs {
            if !emails.contains(addr) {
                emails.push(addr.clone());
            }
        }
    }

    pub fn emails(&self) -> Vec<String> {
        self.emails.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            emails: self.emails(),
            server_type: self.server_type,
            version_id: self.version_id.clone(),
            state: self.state(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            server_type: self.server_type,
            version_id: self.version_id.clone(),
            state: self.state(),
        }
    }

    pub fn profile(&self) -> RoomProfile {
        RoomProfile {
            id: self.id.clone(),
            server_type: self.server_type,
            version_id: self.version_id.clone(),
            name: self.name.clone(),
            emails: self.emails(),
            jar_path: self.jar_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotifier;
    use std::time::Duration;

    const RUNNING_LINE: &str =
        r#"[20:41:05] [Server thread/INFO]: Done (14.132s)! For help, type "help""#;
    const STOPPING_LINE: &str = "[20:41:32] [Server thread/INFO]: Stopping server";

    fn test_profile(name: &str) -> RoomProfile {
        RoomProfile {
            id: RoomId::new(),
            server_type: ServerType::Vanilla,
            version_id: "1.20.1".to_string(),
            name: name.to_string(),
            emails: Vec::new(),
            jar_path: PathBuf::from("/unused/server.jar"),
        }
    }

    fn sh_room(dir: &std::path::Path, script: &str, feed: Option<StateFeed>) -> Arc<Room> {
        let spec = LaunchSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            dir: dir.to_path_buf(),
        };
        Room::with_launch_spec(test_profile("alpha"), spec, Arc::new(TracingNotifier), feed)
    }

    async fn recv_until(
        rx: &mut mpsc::UnboundedReceiver<String>,
        want: &str,
    ) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for fan-out")
                .expect("subscriber channel closed");
            seen.push(msg.clone());
            if msg == want {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn email_append_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let room = sh_room(dir.path(), "true", None);

        room.add_email(&["a@x.com".to_string()]);
        room.add_email(&["a@x.com".to_string(), "b@x.com".to_string()]);
        assert_eq!(
            room.emails(),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
    }

    #[tokio::test]
    async fn broken_subscriber_is_removed_on_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let room = sh_room(dir.path(), "true", None);

        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        room.add_subscriber(dead_tx);
        room.add_subscriber(alive_tx);
        drop(dead_rx);

        room.broadcast("hello");
        assert_eq!(alive_rx.try_recv().unwrap(), "hello");
        assert_eq!(
            room.subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn command_pump_and_fan_out_full_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        let room = sh_room(
            dir.path(),
            r#"read a; echo "$a"; read b; echo "$b""#,
            Some(feed_tx),
        );

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        room.add_subscriber(sub_tx);

        room.start().unwrap();
        room.send_command(RUNNING_LINE.to_string()).await;
        let seen = recv_until(&mut sub_rx, "RUNNING").await;
        assert!(seen.contains(&RUNNING_LINE.to_string()));

        room.send_command(STOPPING_LINE.to_string()).await;
        recv_until(&mut sub_rx, "CLOSED").await;

        let mut states = Vec::new();
        while let Ok((id, state)) = feed_rx.try_recv() {
            assert_eq!(&id, room.id());
            states.push(state);
        }
        assert_eq!(
            states,
            vec![
                ServerState::Starting,
                ServerState::Running,
                ServerState::Stopping,
                ServerState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn pump_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let room = sh_room(dir.path(), r#"read a; echo "$a""#, None);

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        room.add_subscriber(sub_tx);

        room.start().unwrap();
        room.send_command("first run".to_string()).await;
        let seen = recv_until(&mut sub_rx, "CLOSED").await;
        assert!(seen.contains(&"first run".to_string()));

        room.start().unwrap();
        room.send_command("second run".to_string()).await;
        let seen = recv_until(&mut sub_rx, "CLOSED").await;
        assert!(seen.contains(&"second run".to_string()));
    }

    #[tokio::test]
    async fn commands_while_closed_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let room = sh_room(dir.path(), "true", None);

        // Closed: must not block even with a full queue.
        room.send_command("one".to_string()).await;
        room.send_command("two".to_string()).await;
        assert_eq!(room.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn websocket_subscriber_round_trip() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        let dir = tempfile::tempdir().unwrap();
        let room = sh_room(dir.path(), r#"read a; echo "$a""#, None);

        let (server_io, client_io) = tokio::io::duplex(4096);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client_ws =
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        room.start().unwrap();
        room.add_socket(server_ws);

        client_ws
            .send(Message::text("hello from the socket"))
            .await
            .unwrap();

        let mut saw_echo = false;
        while let Ok(Some(Ok(msg))) =
            tokio::time::timeout(Duration::from_secs(5), client_ws.next()).await
        {
            if let Ok(text) = msg.into_text() {
                if text.as_str() == "hello from the socket" {
                    saw_echo = true;
                }
                if text.as_str() == "CLOSED" {
                    break;
                }
            }
        }
        assert!(saw_echo);
    }
}
