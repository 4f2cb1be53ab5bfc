// Collaboration session manager. Sessions are keyed by
// `"{room_id}:{document_id}"` and hold a monotonic version counter.
// Accepting a change, stamping its version, and enqueueing the broadcast
// all happen under one write lock, so each accepted change carries a
// unique version and every peer's outbound channel receives changes in
// version order.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use strata_common::protocol::ws::ServerEvent;
use strata_common::types::{session_key, DocumentChange, SessionSummary};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::{registry::ConnectionRegistry, store::EventLog};

/// Durable retention for accepted document changes.
pub const CHANGE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CollabSession {
    room_id: String,
    document_id: String,
    started_by: Uuid,
    started_at: DateTime<Utc>,
    participants: HashSet<Uuid>,
    version: i64,
}

/// A session that was torn down because its last participant left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    pub session_key: String,
    pub room_id: String,
    pub document_id: String,
}

#[derive(Clone)]
pub struct CollabSessionManager {
    sessions: Arc<RwLock<HashMap<String, CollabSession>>>,
    event_log: EventLog,
}

impl CollabSessionManager {
    pub fn new(event_log: EventLog) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), event_log }
    }

    /// Create the session if absent and add the user as a participant.
    /// Starting an already-active session just joins it. Returns the
    /// session key.
    pub async fn start(&self, room_id: &str, document_id: &str, user_id: Uuid) -> String {
        let key = session_key(room_id, document_id);
        let mut guard = self.sessions.write().await;
        let session = guard.entry(key.clone()).or_insert_with(|| CollabSession {
            room_id: room_id.to_string(),
            document_id: document_id.to_string(),
            started_by: user_id,
            started_at: Utc::now(),
            participants: HashSet::new(),
            version: 0,
        });
        session.participants.insert(user_id);
        key
    }

    /// Accept a change into an active session the user participates in.
    ///
    /// Returns the version-stamped change, or `None` when the session is
    /// unknown or the user is not a participant. The broadcast to the
    /// session's room (excluding the author) is enqueued before the
    /// session lock is released, so peers always observe versions in
    /// order even under concurrent authors. Accepted changes are archived
    /// off the lock with a bounded retention.
    pub async fn apply_change(
        &self,
        session_key: &str,
        user_id: Uuid,
        payload: Value,
        registry: &ConnectionRegistry,
    ) -> Option<DocumentChange> {
        let change = {
            let mut guard = self.sessions.write().await;
            let session = guard.get_mut(session_key)?;
            if !session.participants.contains(&user_id) {
                return None;
            }

            session.version += 1;
            let change = DocumentChange {
                session_key: session_key.to_string(),
                user_id,
                version: session.version,
                payload,
                timestamp: Utc::now(),
            };

            registry
                .broadcast(
                    &session.room_id,
                    ServerEvent::DocumentChange { change: change.clone() },
                    Some(user_id),
                )
                .await;

            change
        };

        let event_log = self.event_log.clone();
        let stream_key = format!("changes:{session_key}");
        let archived = json!(change);
        tokio::spawn(async move {
            if let Err(error) = event_log.append(&stream_key, archived, CHANGE_RETENTION).await {
                warn!(error = ?error, stream_key = %stream_key, "failed to archive document change");
            }
        });

        Some(change)
    }

    /// Remove the user from a session. The session is deleted when its
    /// participant set becomes empty, and only then is an [`EndedSession`]
    /// returned. Ending a session the user never joined is a no-op.
    pub async fn end(&self, room_id: &str, document_id: &str, user_id: Uuid) -> Option<EndedSession> {
        let key = session_key(room_id, document_id);
        let mut guard = self.sessions.write().await;
        let session = guard.get_mut(&key)?;
        if !session.participants.remove(&user_id) {
            return None;
        }

        if session.participants.is_empty() {
            guard.remove(&key);
            return Some(EndedSession {
                session_key: key,
                room_id: room_id.to_string(),
                document_id: document_id.to_string(),
            });
        }

        None
    }

    /// Drop the user from every session they participate in, applying the
    /// same empty-set teardown as an explicit end. Returns the sessions
    /// that ended as a result. Called from every disconnect path.
    pub async fn remove_user(&self, user_id: Uuid) -> Vec<EndedSession> {
        let mut guard = self.sessions.write().await;
        let mut ended = Vec::new();

        guard.retain(|key, session| {
            if session.participants.remove(&user_id) && session.participants.is_empty() {
                ended.push(EndedSession {
                    session_key: key.clone(),
                    room_id: session.room_id.clone(),
                    document_id: session.document_id.clone(),
                });
                return false;
            }
            true
        });

        ended.sort_by(|left, right| left.session_key.cmp(&right.session_key));
        ended
    }

    /// Summaries of every active session, sorted by key.
    pub async fn active_sessions(&self) -> Vec<SessionSummary> {
        let guard = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = guard
            .iter()
            .map(|(key, session)| {
                let mut participants: Vec<Uuid> = session.participants.iter().copied().collect();
                participants.sort();
                SessionSummary {
                    session_key: key.clone(),
                    room_id: session.room_id.clone(),
                    document_id: session.document_id.clone(),
                    started_by: session.started_by,
                    started_at: session.started_at,
                    participants,
                    version: session.version,
                }
            })
            .collect();
        summaries.sort_by(|left, right| left.session_key.cmp(&right.session_key));
        summaries
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{CollabSessionManager, EndedSession};
    use crate::registry::{ConnectionRegistry, Outbound};
    use crate::store::EventLog;
    use serde_json::json;
    use strata_common::protocol::ws::ServerEvent;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn manager() -> CollabSessionManager {
        CollabSessionManager::new(EventLog::in_memory())
    }

    #[tokio::test]
    async fn start_is_idempotent_create_or_join() {
        let collab = manager();
        let starter = Uuid::new_v4();
        let joiner = Uuid::new_v4();

        let key = collab.start("R1", "D1", starter).await;
        assert_eq!(key, "R1:D1");
        let same_key = collab.start("R1", "D1", joiner).await;
        assert_eq!(same_key, key);

        let sessions = collab.active_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_by, starter);
        assert_eq!(sessions[0].participants.len(), 2);
        assert_eq!(sessions[0].version, 0);
    }

    #[tokio::test]
    async fn versions_increase_by_one_per_accepted_change() {
        let collab = manager();
        let registry = ConnectionRegistry::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        collab.start("R1", "D1", first).await;
        collab.start("R1", "D1", second).await;

        let change_one = collab
            .apply_change("R1:D1", first, json!({ "op": "a" }), &registry)
            .await
            .expect("change should be accepted");
        let change_two = collab
            .apply_change("R1:D1", second, json!({ "op": "b" }), &registry)
            .await
            .expect("change should be accepted");

        assert_eq!(change_one.version, 1);
        assert_eq!(change_two.version, 2);
        assert_eq!(collab.active_sessions().await[0].version, 2);
    }

    #[tokio::test]
    async fn concurrent_authors_deliver_versions_in_channel_order() {
        let collab = manager();
        let registry = ConnectionRegistry::default();
        let peer = Uuid::new_v4();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        registry.register(peer, "R1", Uuid::new_v4(), sender).await;

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        collab.start("R1", "D1", first).await;
        collab.start("R1", "D1", second).await;

        let mut authors = Vec::new();
        for author in [first, second] {
            let collab = collab.clone();
            let registry = registry.clone();
            authors.push(tokio::spawn(async move {
                for index in 0..50 {
                    collab
                        .apply_change("R1:D1", author, json!({ "seq": index }), &registry)
                        .await
                        .expect("change should be accepted");
                }
            }));
        }
        for author in authors {
            author.await.expect("author task should finish");
        }

        let mut expected_version = 1;
        while let Ok(outbound) = receiver.try_recv() {
            match outbound {
                Outbound::Event(ServerEvent::DocumentChange { change }) => {
                    assert_eq!(change.version, expected_version);
                    expected_version += 1;
                }
                other => panic!("expected document_change, got {other:?}"),
            }
        }
        assert_eq!(expected_version, 101);
    }

    #[tokio::test]
    async fn changes_for_unknown_sessions_are_rejected() {
        let collab = manager();
        let registry = ConnectionRegistry::default();
        let user_id = Uuid::new_v4();

        assert!(collab.apply_change("R1:D1", user_id, json!({}), &registry).await.is_none());
    }

    #[tokio::test]
    async fn changes_from_non_participants_are_rejected() {
        let collab = manager();
        let registry = ConnectionRegistry::default();
        collab.start("R1", "D1", Uuid::new_v4()).await;

        assert!(
            collab.apply_change("R1:D1", Uuid::new_v4(), json!({}), &registry).await.is_none()
        );
    }

    #[tokio::test]
    async fn session_ends_only_when_last_participant_leaves() {
        let collab = manager();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        collab.start("R1", "D1", first).await;
        collab.start("R1", "D1", second).await;

        assert!(collab.end("R1", "D1", first).await.is_none());
        assert_eq!(collab.session_count().await, 1);

        let ended = collab.end("R1", "D1", second).await;
        assert_eq!(
            ended,
            Some(EndedSession {
                session_key: "R1:D1".into(),
                room_id: "R1".into(),
                document_id: "D1".into(),
            })
        );
        assert_eq!(collab.session_count().await, 0);
    }

    #[tokio::test]
    async fn ending_as_non_participant_is_a_noop() {
        let collab = manager();
        collab.start("R1", "D1", Uuid::new_v4()).await;

        assert!(collab.end("R1", "D1", Uuid::new_v4()).await.is_none());
        assert_eq!(collab.session_count().await, 1);
    }

    #[tokio::test]
    async fn remove_user_ends_their_solo_sessions() {
        let collab = manager();
        let leaving = Uuid::new_v4();
        let staying = Uuid::new_v4();
        collab.start("R1", "D1", leaving).await;
        collab.start("R1", "D2", leaving).await;
        collab.start("R1", "D2", staying).await;

        let ended = collab.remove_user(leaving).await;
        assert_eq!(
            ended,
            vec![EndedSession {
                session_key: "R1:D1".into(),
                room_id: "R1".into(),
                document_id: "D1".into(),
            }]
        );

        let remaining = collab.active_sessions().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_key, "R1:D2");
        assert_eq!(remaining[0].participants, vec![staying]);
    }

    #[tokio::test]
    async fn removed_user_can_no_longer_submit_changes() {
        let collab = manager();
        let registry = ConnectionRegistry::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        collab.start("R1", "D1", first).await;
        collab.start("R1", "D1", second).await;

        collab.remove_user(first).await;
        assert!(collab.apply_change("R1:D1", first, json!({}), &registry).await.is_none());
        assert!(collab.apply_change("R1:D1", second, json!({}), &registry).await.is_some());
    }
}
