//! Room registry: owns the set of rooms and the aggregate list feed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use hearth_process::{RoomId, RoomSummary, ServerState};

use crate::notify::Notifier;
use crate::profile::{self, RoomProfile};
use crate::room::Room;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate room id: {0}")]
    DuplicateId(RoomId),
    #[error("duplicate room name: {0}")]
    DuplicateName(String),
    #[error("rooms already loaded")]
    AlreadyLoaded,
    #[error(transparent)]
    Profiles(#[from] anyhow::Error),
}

struct Inner {
    rooms: HashMap<RoomId, Arc<Room>>,
    loaded: bool,
}

pub struct RoomRegistry {
    java_bin: String,
    java_heap_mb: u32,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<Inner>,
    list_subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    feed_tx: mpsc::UnboundedSender<(RoomId, ServerState)>,
}

impl RoomRegistry {
    pub fn new(java_bin: &str, java_heap_mb: u32, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            java_bin: java_bin.to_string(),
            java_heap_mb,
            notifier,
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                loaded: false,
            }),
            list_subscribers: Mutex::new(Vec::new()),
            feed_tx,
        });

        // List feed drain: every room state change goes to the list-level
        // subscribers as a small JSON frame.
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some((id, state)) = feed_rx.recv().await {
                let Some(registry) = weak.upgrade() else { break };
                let frame = serde_json::json!({
                    "id": id,
                    "state": state,
                })
                .to_string();
                registry.broadcast_list(&frame);
            }
        });

        registry
    }

    pub fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.rooms.get(id).cloned()
    }

    /// Adds a room built from `profile`. Duplicate ids and duplicate names
    /// are both rejected, never overwritten.
    pub fn new_room(&self, profile: RoomProfile) -> Result<Arc<Room>, RegistryError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.rooms.contains_key(&profile.id) {
            return Err(RegistryError::DuplicateId(profile.id));
        }
        if inner.rooms.values().any(|r| r.name() == profile.name) {
            return Err(RegistryError::DuplicateName(profile.name));
        }

        let room = Room::new(
            profile,
            &self.java_bin,
            self.java_heap_mb,
            Arc::clone(&self.notifier),
            Some(self.feed_tx.clone()),
        );
        inner.rooms.insert(room.id().clone(), Arc::clone(&room));
        Ok(room)
    }

    /// Populates the registry from persisted profiles. A second call after a
    /// successful load is an error; a failed load may be retried.
    pub fn load_rooms(&self, path: &Path) -> Result<usize, RegistryError> {
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.loaded {
                return Err(RegistryError::AlreadyLoaded);
            }
        }

        let profiles = profile::load_profiles(path)?;
        let count = profiles.len();
        for p in profiles {
            self.new_room(p)?;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.loaded = true;
        tracing::info!(rooms = count, "room profiles loaded");
        Ok(count)
    }

    pub fn save_rooms(&self, path: &Path) -> anyhow::Result<()> {
        let profiles: Vec<RoomProfile> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut v: Vec<RoomProfile> = inner.rooms.values().map(|r| r.profile()).collect();
            v.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
            v
        };
        profile::save_profiles(path, &profiles)
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<RoomSummary> = inner.rooms.values().map(|r| r.summary()).collect();
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        out
    }

    pub fn add_list_subscriber(&self, tx: mpsc::UnboundedSender<String>) {
        let mut subs = self
            .list_subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subs.push(tx);
    }

    /// Binds a WebSocket connection to the aggregate list feed. Inbound
    /// frames are ignored; the list feed is broadcast-only.
    pub fn add_list_socket<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        use futures_util::{SinkExt, StreamExt};

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.add_list_subscriber(tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = rx.recv() => {
                        let Some(line) = line else { break };
                        if sink.send(Message::text(line)).await.is_err() {
                            break;
                        }
                    }
                    // Drain inbound frames so the connection stays healthy.
                    msg = stream.next() => {
                        if msg.is_none() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });
    }

    // Same failure policy as room fan-out: failed writes mark the index,
    // marked subscribers are swap-removed after the pass.
    fn broadcast_list(&self, msg: &str) {
        let mut subs = self
            .list_subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotifier;
    use hearth_process::ServerType;
    use std::path::PathBuf;
    use std::time::Duration;

    fn registry() -> Arc<RoomRegistry> {
        RoomRegistry::new("java", 1024, Arc::new(TracingNotifier))
    }

    fn profile(id: &str, name: &str) -> RoomProfile {
        RoomProfile {
            id: RoomId(id.to_string()),
            server_type: ServerType::Vanilla,
            version_id: "1.20.1".to_string(),
            name: name.to_string(),
            emails: Vec::new(),
            jar_path: PathBuf::from(format!("/srv/{id}/server.jar")),
        }
    }

    #[tokio::test]
    async fn duplicate_id_and_name_are_rejected() {
        let reg = registry();
        reg.new_room(profile("a", "alpha")).unwrap();

        assert!(matches!(
            reg.new_room(profile("a", "other")),
            Err(RegistryError::DuplicateId(_))
        ));
        assert!(matches!(
            reg.new_room(profile("b", "alpha")),
            Err(RegistryError::DuplicateName(_))
        ));

        assert!(reg.get(&RoomId("a".to_string())).is_some());
        assert!(reg.get(&RoomId("b".to_string())).is_none());
    }

    #[tokio::test]
    async fn load_rooms_is_a_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        profile::save_profiles(&path, &[profile("a", "alpha"), profile("b", "beta")]).unwrap();

        let reg = registry();
        assert_eq!(reg.load_rooms(&path).unwrap(), 2);
        assert!(matches!(
            reg.load_rooms(&path),
            Err(RegistryError::AlreadyLoaded)
        ));
        assert_eq!(reg.summaries().len(), 2);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");

        // First attempt fails: no profiles file yet.
        let reg = registry();
        assert!(matches!(
            reg.load_rooms(&path),
            Err(RegistryError::Profiles(_))
        ));

        profile::save_profiles(&path, &[profile("a", "alpha")]).unwrap();
        assert_eq!(reg.load_rooms(&path).unwrap(), 1);
        assert!(matches!(
            reg.load_rooms(&path),
            Err(RegistryError::AlreadyLoaded)
        ));
    }

    #[tokio::test]
    async fn save_rooms_round_trips_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        reg.new_room(profile("a", "alpha")).unwrap();
        reg.new_room(profile("b", "beta")).unwrap();

        let path = dir.path().join("rooms.json");
        reg.save_rooms(&path).unwrap();

        let loaded = profile::load_profiles(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id.as_str(), "a");
        assert_eq!(loaded[1].name, "beta");
    }

    #[tokio::test]
    async fn summaries_expose_only_list_fields() {
        let reg = registry();
        reg.new_room(profile("a", "alpha")).unwrap();

        let summaries = reg.summaries();
        assert_eq!(summaries.len(), 1);
        let json = serde_json::to_value(&summaries[0]).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["name"], "alpha");
        assert_eq!(json["server-type"], "VANILLA");
        assert_eq!(json["version-id"], "1.20.1");
        assert_eq!(json["state"], "CLOSED");
        assert!(json.get("emails").is_none());
    }

    #[tokio::test]
    async fn list_feed_broadcasts_and_drops_dead_subscribers() {
        let reg = registry();

        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        reg.add_list_subscriber(dead_tx);
        reg.add_list_subscriber(alive_tx);
        drop(dead_rx);

        reg.feed_tx
            .send((RoomId("a".to_string()), ServerState::Running))
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), alive_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["state"], "RUNNING");

        assert_eq!(
            reg.list_subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            1
        );
    }
}
