// ============================================
// In-Memory Stores
// ============================================
//
// Sharded keyed stores backing the engine by default. Per-user state
// lives behind one DashMap shard per key so unrelated users never
// contend; bounded buffers and lazy pruning keep memory flat.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use super::{ChannelProvider, ContentStore, ProfileStore, Result, TemplateStore};
use crate::models::{
    BehaviorEvent, ContentItem, DeliveryResult, DeliveryStatus, Notification,
    NotificationChannel, NotificationTemplate, NotificationType, UserProfile,
};

/// Default bound on the per-user raw event buffer
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Default bound on the per-user notification log
const NOTIFICATION_LOG_CAP: usize = 200;

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<Uuid, UserProfile>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        self.profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        self.profiles.remove(&user_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryContentStore {
    items: DashMap<Uuid, ContentItem>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: ContentItem) {
        self.items.insert(item.id, item);
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get(&self, content_id: Uuid) -> Result<Option<ContentItem>> {
        Ok(self.items.get(&content_id).map(|c| c.clone()))
    }
}

pub struct InMemoryTemplateStore {
    templates: DashMap<NotificationType, NotificationTemplate>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        let store = Self {
            templates: DashMap::new(),
        };
        for (notification_type, title, message) in [
            (
                NotificationType::BreakingNews,
                "Breaking: {title}",
                "{category} just now: {message}",
            ),
            (
                NotificationType::Recommendation,
                "Recommended for you: {title}",
                "Because you read {category}: {message}",
            ),
            (
                NotificationType::SocialInteraction,
                "{author} {action}",
                "{author} {action} on \"{title}\"",
            ),
            (
                NotificationType::Achievement,
                "Achievement unlocked",
                "You earned {achievement}",
            ),
            (NotificationType::System, "{title}", "{message}"),
            (
                NotificationType::Digest,
                "Your digest",
                "{message}",
            ),
            (
                NotificationType::ReEngagement,
                "New in {category}",
                "{message}",
            ),
        ] {
            store.templates.insert(
                notification_type,
                NotificationTemplate {
                    title_template: title.to_string(),
                    message_template: message.to_string(),
                },
            );
        }
        store
    }

    pub fn set(&self, notification_type: NotificationType, template: NotificationTemplate) {
        self.templates.insert(notification_type, template);
    }
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(
        &self,
        notification_type: NotificationType,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self.templates.get(&notification_type).map(|t| t.clone()))
    }
}

/// Channel provider stub: succeeds for every channel not listed as
/// failing, and records what it delivered.
#[derive(Default)]
pub struct StubChannelProvider {
    failing: HashSet<NotificationChannel>,
    delivered: Mutex<Vec<(Uuid, NotificationChannel)>>,
}

impl StubChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(channels: impl IntoIterator<Item = NotificationChannel>) -> Self {
        Self {
            failing: channels.into_iter().collect(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<(Uuid, NotificationChannel)> {
        self.delivered.lock().expect("delivery log poisoned").clone()
    }
}

#[async_trait]
impl ChannelProvider for StubChannelProvider {
    async fn deliver(
        &self,
        notification: &Notification,
        channel: NotificationChannel,
    ) -> Result<DeliveryResult> {
        let now = Utc::now();
        if self.failing.contains(&channel) {
            return Ok(DeliveryResult {
                channel,
                status: DeliveryStatus::Failed,
                message_id: None,
                error: Some("provider rejected delivery".to_string()),
                attempted_at: now,
                delivered_at: None,
            });
        }
        self.delivered
            .lock()
            .expect("delivery log poisoned")
            .push((notification.id, channel));
        Ok(DeliveryResult {
            channel,
            status: DeliveryStatus::Success,
            message_id: Some(Uuid::new_v4().to_string()),
            error: None,
            attempted_at: now,
            delivered_at: Some(now),
        })
    }
}

struct SessionEntry {
    user_id: Uuid,
    last_activity: DateTime<Utc>,
}

/// Bounded per-user raw event buffer with a session index. Sessions idle
/// past the prune window are dropped together with their buffered events.
pub struct InMemoryEventHistory {
    events: DashMap<Uuid, VecDeque<BehaviorEvent>>,
    sessions: DashMap<String, SessionEntry>,
    buffer_size: usize,
}

impl InMemoryEventHistory {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            events: DashMap::new(),
            sessions: DashMap::new(),
            buffer_size,
        }
    }

    pub fn record(&self, event: &BehaviorEvent) {
        let mut buffer = self.events.entry(event.user_id).or_default();
        buffer.push_back(event.clone());
        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }
        drop(buffer);

        self.sessions.insert(
            event.session_id.clone(),
            SessionEntry {
                user_id: event.user_id,
                last_activity: event.timestamp,
            },
        );
    }

    /// All buffered events for a user, oldest first
    pub fn events_for(&self, user_id: Uuid) -> Vec<BehaviorEvent> {
        self.events
            .get(&user_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Buffered events for one (user, content) pair, oldest first
    pub fn content_events(&self, user_id: Uuid, content_id: Uuid) -> Vec<BehaviorEvent> {
        self.events
            .get(&user_id)
            .map(|buf| {
                buf.iter()
                    .filter(|e| e.content_id == Some(content_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop sessions idle past `idle` and their buffered events
    pub fn prune_idle_sessions(&self, now: DateTime<Utc>, idle: Duration) {
        let mut stale: Vec<(String, Uuid)> = Vec::new();
        for entry in self.sessions.iter() {
            if now - entry.last_activity > idle {
                stale.push((entry.key().clone(), entry.user_id));
            }
        }
        for (session_id, user_id) in stale {
            self.sessions.remove(&session_id);
            if let Some(mut buf) = self.events.get_mut(&user_id) {
                buf.retain(|e| e.session_id != session_id);
            }
        }
    }

    pub fn erase(&self, user_id: Uuid) {
        self.events.remove(&user_id);
        self.sessions.retain(|_, entry| entry.user_id != user_id);
    }
}

impl Default for InMemoryEventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

/// Per-user log of notifications that cleared the pipeline; feeds the
/// dedup engine and the scorer's recent-delivery context.
pub struct InMemoryNotificationLog {
    log: DashMap<Uuid, VecDeque<Notification>>,
    retention: Duration,
}

impl InMemoryNotificationLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            log: DashMap::new(),
            retention,
        }
    }

    pub fn record(&self, notification: &Notification) {
        let mut entries = self.log.entry(notification.user_id).or_default();
        let cutoff = notification.created_at - self.retention;
        entries.retain(|n| n.created_at >= cutoff);
        entries.push_back(notification.clone());
        while entries.len() > NOTIFICATION_LOG_CAP {
            entries.pop_front();
        }
    }

    /// Notifications recorded since `since`, oldest first
    pub fn recent(&self, user_id: Uuid, since: DateTime<Utc>) -> Vec<Notification> {
        self.log
            .get(&user_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|n| n.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn recent_content_ids(&self, user_id: Uuid, since: DateTime<Utc>) -> Vec<Uuid> {
        self.recent(user_id, since)
            .into_iter()
            .filter_map(|n| n.content_id)
            .collect()
    }

    pub fn erase(&self, user_id: Uuid) {
        self.log.remove(&user_id);
    }
}

impl Default for InMemoryNotificationLog {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}
