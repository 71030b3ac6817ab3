// ============================================
// Store Contracts
// ============================================
//
// Outbound collaborator contracts and keyed state surfaces. The engine
// only ever talks to content, profiles, templates, and delivery channels
// through these traits; production wiring supplies real backends while
// the in-memory implementations double as test fixtures.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ContentItem, DeliveryResult, Notification, NotificationChannel, NotificationTemplate,
    NotificationType, UserProfile,
};

pub use memory::{
    InMemoryContentStore, InMemoryEventHistory, InMemoryNotificationLog, InMemoryProfileStore,
    InMemoryTemplateStore, StubChannelProvider,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persisted user profile surface
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    async fn save(&self, profile: &UserProfile) -> Result<()>;

    /// Explicit erasure, the only hard-delete path
    async fn delete(&self, user_id: Uuid) -> Result<()>;
}

/// Read-only content lookup supplied by an external content store
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, content_id: Uuid) -> Result<Option<ContentItem>>;
}

/// Notification text templates keyed by type
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, notification_type: NotificationType)
        -> Result<Option<NotificationTemplate>>;
}

/// External delivery channel. Transport (FCM, SMTP, SMS gateway, socket)
/// is entirely the implementor's concern, including timeouts.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn deliver(
        &self,
        notification: &Notification,
        channel: NotificationChannel,
    ) -> Result<DeliveryResult>;
}
