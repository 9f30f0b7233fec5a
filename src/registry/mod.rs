//! Host-side session registry.
//!
//! Authoritative record of which participants have joined which session.
//! Owned by one [`HostServer`](crate::server::HostServer) for the lifetime of
//! its listening state; nothing here survives a process restart.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Joined participant names, in join order, unique by exact match.
    pub participants: Vec<String>,
}

/// Result of [`SessionRegistry::try_add_participant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False only when the session does not exist.
    pub accepted: bool,
    /// True when the name was not already present.
    pub added: bool,
    /// Full participant list after the operation.
    pub participants: Vec<String>,
}

impl JoinOutcome {
    fn rejected() -> Self {
        Self {
            accepted: false,
            added: false,
            participants: Vec::new(),
        }
    }
}

/// In-memory map from session id to participant list.
///
/// The map is guarded by a read/write lock; each session's participant list
/// has its own mutex so joins against different sessions never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Vec<String>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session, creating an empty one if absent.
    pub async fn ensure_session(&self, session_id: &str) -> Session {
        let participants = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    info!(session_id = %session_id, "Session created");
                    Arc::new(Mutex::new(Vec::new()))
                })
                .clone()
        };

        let participants = participants.lock().await.clone();
        Session {
            id: session_id.to_string(),
            participants,
        }
    }

    /// Append `name` to the session unless already present.
    ///
    /// Atomic per session: the presence check and the append happen under
    /// the session's lock.
    pub async fn try_add_participant(&self, session_id: &str, name: &str) -> JoinOutcome {
        let Some(session) = self.session_handle(session_id).await else {
            debug!(session_id = %session_id, "Join against unknown session");
            return JoinOutcome::rejected();
        };

        let mut participants = session.lock().await;
        let added = !participants.iter().any(|p| p == name);
        if added {
            participants.push(name.to_string());
        }

        JoinOutcome {
            accepted: true,
            added,
            participants: participants.clone(),
        }
    }

    /// Delete a session. Returns whether it existed.
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// Current participants, or `None` for an unknown session.
    pub async fn participants(&self, session_id: &str) -> Option<Vec<String>> {
        let session = self.session_handle(session_id).await?;
        let participants = session.lock().await.clone();
        Some(participants)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Drop every session.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        debug!(count = count, "Session registry cleared");
    }

    async fn session_handle(&self, session_id: &str) -> Option<Arc<Mutex<Vec<String>>>> {
        self.sessions.read().await.get(session_id).cloned()
    }
}
