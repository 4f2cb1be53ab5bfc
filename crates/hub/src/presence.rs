// Presence tracking: who is in which room and when they were last heard
// from. Every inbound frame refreshes the activity timestamp; the reaper
// asks for users whose inactivity exceeds the configured threshold.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PresenceRecord {
    room_id: String,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<Uuid, PresenceRecord>>>,
}

impl PresenceTracker {
    pub async fn track(&self, user_id: Uuid, room_id: &str) {
        let now = Utc::now();
        self.inner.write().await.insert(
            user_id,
            PresenceRecord { room_id: room_id.to_string(), connected_at: now, last_activity: now },
        );
    }

    /// Refresh the activity timestamp. A no-op for unknown users.
    pub async fn touch(&self, user_id: Uuid) {
        if let Some(record) = self.inner.write().await.get_mut(&user_id) {
            record.last_activity = Utc::now();
        }
    }

    pub async fn remove(&self, user_id: Uuid) {
        self.inner.write().await.remove(&user_id);
    }

    pub async fn room_for(&self, user_id: Uuid) -> Option<String> {
        self.inner.read().await.get(&user_id).map(|record| record.room_id.clone())
    }

    pub async fn connected_since(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(&user_id).map(|record| record.connected_at)
    }

    /// Users whose last activity is older than `threshold`.
    pub async fn idle_users(&self, threshold: Duration) -> Vec<Uuid> {
        self.idle_users_at(threshold, Utc::now()).await
    }

    async fn idle_users_at(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<Uuid> {
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return Vec::new();
        };

        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, record)| now - record.last_activity > threshold)
            .map(|(user_id, _)| *user_id)
            .collect()
    }

    #[cfg(test)]
    async fn backdate_activity(&self, user_id: Uuid, by: Duration) {
        if let Some(record) = self.inner.write().await.get_mut(&user_id) {
            record.last_activity -= chrono::Duration::from_std(by).expect("duration in range");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PresenceTracker;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn tracks_and_removes_users() {
        let presence = PresenceTracker::default();
        let user_id = Uuid::new_v4();

        presence.track(user_id, "R1").await;
        assert_eq!(presence.room_for(user_id).await.as_deref(), Some("R1"));

        presence.remove(user_id).await;
        assert!(presence.room_for(user_id).await.is_none());
    }

    #[tokio::test]
    async fn fresh_users_are_not_idle() {
        let presence = PresenceTracker::default();
        let user_id = Uuid::new_v4();
        presence.track(user_id, "R1").await;

        let idle = presence.idle_users(Duration::from_secs(3600)).await;
        assert!(idle.is_empty());
    }

    #[tokio::test]
    async fn stale_users_are_reported_idle() {
        let presence = PresenceTracker::default();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        presence.track(stale, "R1").await;
        presence.track(fresh, "R1").await;
        presence.backdate_activity(stale, Duration::from_secs(7200)).await;

        let idle = presence.idle_users(Duration::from_secs(3600)).await;
        assert_eq!(idle, vec![stale]);
    }

    #[tokio::test]
    async fn touch_resets_the_idle_clock() {
        let presence = PresenceTracker::default();
        let user_id = Uuid::new_v4();
        presence.track(user_id, "R1").await;
        presence.backdate_activity(user_id, Duration::from_secs(7200)).await;
        presence.touch(user_id).await;

        let idle = presence.idle_users(Duration::from_secs(3600)).await;
        assert!(idle.is_empty());
    }
}
