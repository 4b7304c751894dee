//! WebSocket session registry with newest-wins displacement.
//!
//! Each bridged session is registered under the identity extracted from the
//! upgrade request (user, optionally scoped to a resource). A second upgrade
//! for the same identity displaces the first: the registry signals the old
//! session to close its client with code 1000, waits briefly for the close to
//! flush, and hands the slot to the newcomer.
use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use scc::{HashMap, hash_map::Entry};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a displaced session gets to flush its close frame before the
/// replacement proceeds anyway.
const DISPLACE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity a bridged session is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub resource_id: Option<String>,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, resource_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            resource_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(resource) => write!(f, "{}/{}", self.user_id, resource),
            None => write!(f, "{}", self.user_id),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    id: Uuid,
    fallback: bool,
    connected_at: DateTime<Utc>,
    displace_tx: mpsc::Sender<oneshot::Sender<()>>,
}

/// Handle held by the bridge task for the lifetime of one session.
///
/// `displaced` fires when a newer connection claims the same key; the bridge
/// is expected to close its client with code 1000 and acknowledge through the
/// received sender.
#[derive(Debug)]
pub struct ActiveSession {
    pub id: Uuid,
    pub displaced: mpsc::Receiver<oneshot::Sender<()>>,
}

/// Snapshot of one live session, as exposed on the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub session_id: Uuid,
    pub fallback: bool,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live bridged sessions, one per [`SessionKey`]
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionKey, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `key`, displacing any current owner.
    pub async fn activate(&self, key: SessionKey, fallback: bool) -> ActiveSession {
        if let Some((_, previous)) = self.sessions.remove_async(&key).await {
            displace(&key, previous).await;
        }

        let id = Uuid::new_v4();
        let (displace_tx, displaced) = mpsc::channel(1);
        let entry = SessionEntry {
            id,
            fallback,
            connected_at: Utc::now(),
            displace_tx,
        };

        match self.sessions.entry_async(key.clone()).await {
            Entry::Occupied(mut slot) => {
                // A concurrent connect claimed the key between the eviction
                // above and this insert. Newest wins.
                let raced = std::mem::replace(slot.get_mut(), entry);
                drop(slot);
                displace(&key, raced).await;
            }
            Entry::Vacant(slot) => {
                slot.insert_entry(entry);
            }
        }

        debug!(session = %key, session_id = %id, fallback, "session registered");
        ActiveSession { id, displaced }
    }

    /// Remove the entry for `key` if it still belongs to session `id`.
    ///
    /// A session that was displaced no longer owns its slot, so its teardown
    /// must not remove the replacement.
    pub async fn remove_if_owner(&self, key: &SessionKey, id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if_async(key, |entry| entry.id == id)
            .await
            .is_some();
        if removed {
            debug!(session = %key, session_id = %id, "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all live sessions, oldest first.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        self.sessions
            .iter_async(|key, entry| {
                sessions.push(SessionInfo {
                    user_id: key.user_id.clone(),
                    resource_id: key.resource_id.clone(),
                    session_id: entry.id,
                    fallback: entry.fallback,
                    connected_at: entry.connected_at,
                });
                true
            })
            .await;
        sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        sessions
    }
}

async fn displace(key: &SessionKey, entry: SessionEntry) {
    info!(session = %key, session_id = %entry.id, "displacing existing session");
    let (ack_tx, ack_rx) = oneshot::channel();
    if entry.displace_tx.send(ack_tx).await.is_err() {
        // Bridge task already gone, nothing to wait for.
        return;
    }
    if timeout(DISPLACE_ACK_TIMEOUT, ack_rx).await.is_err() {
        warn!(
            session = %key,
            session_id = %entry.id,
            "displaced session did not acknowledge close in time"
        );
    }
}
