use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use uuid::Uuid;

/// Maximum events kept in a user's engagement history.
pub const MAX_ENGAGEMENT_HISTORY: usize = 1000;

/// Maximum entries allowed in an event's opaque extension map.
pub const MAX_EXTRA_FIELDS: usize = 16;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },
}

/// Behavior event type emitted by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    Scroll,
    Click,
    ReadStart,
    ReadProgress,
    ReadComplete,
    Like,
    Share,
    Comment,
    Bookmark,
    Search,
    SessionStart,
    SessionEnd,
    NotificationClick,
    NotificationDismiss,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::Scroll => "scroll",
            EventType::Click => "click",
            EventType::ReadStart => "read_start",
            EventType::ReadProgress => "read_progress",
            EventType::ReadComplete => "read_complete",
            EventType::Like => "like",
            EventType::Share => "share",
            EventType::Comment => "comment",
            EventType::Bookmark => "bookmark",
            EventType::Search => "search",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::NotificationClick => "notification_click",
            EventType::NotificationDismiss => "notification_dismiss",
        }
    }

    /// Events that signal deep engagement with content
    pub fn is_deep_engagement(&self) -> bool {
        matches!(
            self,
            EventType::ReadComplete
                | EventType::Like
                | EventType::Share
                | EventType::Comment
                | EventType::Bookmark
        )
    }

    /// Social actions that carry interest weight
    pub fn is_social(&self) -> bool {
        matches!(
            self,
            EventType::Like | EventType::Share | EventType::Comment | EventType::Bookmark
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Device context attached to an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub device_type: String,
    pub os: Option<String>,
    pub app_version: Option<String>,
    pub location: Option<String>,
}

/// Event payload: a closed set of named optional fields plus a bounded
/// opaque extension map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    pub scroll_position: Option<f64>,
    pub scroll_direction: Option<ScrollDirection>,
    /// Scroll speed in layout units per second
    pub scroll_speed: Option<f64>,
    pub duration_ms: Option<u64>,
    pub search_query: Option<String>,
    pub device: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.extra.len() > MAX_EXTRA_FIELDS {
            return Err(ModelError::InvalidEvent(format!(
                "extension map holds {} entries, max is {}",
                self.extra.len(),
                MAX_EXTRA_FIELDS
            )));
        }
        if let Some(pos) = self.scroll_position {
            if !(0.0..=1.0).contains(&pos) {
                return Err(ModelError::InvalidEvent(format!(
                    "scroll_position {} outside [0, 1]",
                    pos
                )));
            }
        }
        Ok(())
    }
}

/// A single raw interaction event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub event_type: EventType,
    pub content_id: Option<Uuid>,
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
}

impl BehaviorEvent {
    pub fn new(
        user_id: Uuid,
        session_id: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id: session_id.into(),
            event_type,
            content_id: None,
            metadata: EventMetadata::default(),
            timestamp,
        }
    }

    pub fn with_content(mut self, content_id: Uuid) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.session_id.is_empty() {
            return Err(ModelError::InvalidEvent("empty session_id".to_string()));
        }
        self.metadata.validate()
    }
}

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BreakingNews,
    Recommendation,
    SocialInteraction,
    Achievement,
    System,
    Digest,
    ReEngagement,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BreakingNews => "breaking_news",
            NotificationType::Recommendation => "recommendation",
            NotificationType::SocialInteraction => "social_interaction",
            NotificationType::Achievement => "achievement",
            NotificationType::System => "system",
            NotificationType::Digest => "digest",
            NotificationType::ReEngagement => "re_engagement",
        }
    }

    pub fn all() -> Vec<NotificationType> {
        vec![
            NotificationType::BreakingNews,
            NotificationType::Recommendation,
            NotificationType::SocialInteraction,
            NotificationType::Achievement,
            NotificationType::System,
            NotificationType::Digest,
            NotificationType::ReEngagement,
        ]
    }
}

/// Notification priority level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl NotificationPriority {
    /// Numeric rank, higher = more urgent
    pub fn rank(&self) -> u8 {
        match self {
            NotificationPriority::Critical => 4,
            NotificationPriority::High => 3,
            NotificationPriority::Medium => 2,
            NotificationPriority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "critical",
            NotificationPriority::High => "high",
            NotificationPriority::Medium => "medium",
            NotificationPriority::Low => "low",
        }
    }
}

/// Delivery status machine. Transitions are one-directional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Scheduled,
    Blocked,
    Aggregated,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Blocked => "blocked",
            NotificationStatus::Aggregated => "aggregated",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `to` is a forward transition.
    pub fn can_transition(&self, to: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, to),
            (Pending, Scheduled)
                | (Pending, Blocked)
                | (Pending, Aggregated)
                | (Pending, Sent)
                | (Pending, Failed)
                | (Scheduled, Blocked)
                | (Scheduled, Aggregated)
                | (Scheduled, Sent)
                | (Scheduled, Failed)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Failed)
                | (Delivered, Read)
        )
    }
}

/// Delivery channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Push,
    Email,
    Sms,
    InApp,
    Socket,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Push => "push",
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
            NotificationChannel::Socket => "socket",
        }
    }

    pub fn all() -> Vec<NotificationChannel> {
        vec![
            NotificationChannel::Push,
            NotificationChannel::Email,
            NotificationChannel::Sms,
            NotificationChannel::InApp,
            NotificationChannel::Socket,
        ]
    }
}

/// The seven-component score vector attached to a notification at creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ScoreVector {
    pub relevance: f64,
    pub timing: f64,
    pub user_activity: f64,
    pub quality: f64,
    pub social: f64,
    pub sentiment: f64,
    pub novelty: f64,
    pub total: f64,
}

/// Per-channel delivery outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel: NotificationChannel,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A candidate notification moving through the decision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    pub content_id: Option<Uuid>,
    pub channels: Vec<NotificationChannel>,
    pub score: Option<ScoreVector>,
    /// Per-channel outcomes, filled at dispatch
    pub delivery_results: Vec<DeliveryResult>,
    /// Terminal decision reason (block/aggregation), machine-readable
    pub decision_reason: Option<String>,
    pub custom_data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        priority: NotificationPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_type,
            priority,
            status: NotificationStatus::Pending,
            title: String::new(),
            message: String::new(),
            content_id: None,
            channels: vec![NotificationChannel::Push],
            score: None,
            delivery_results: Vec::new(),
            decision_reason: None,
            custom_data: HashMap::new(),
            created_at: now,
            scheduled_at: None,
            sent_at: None,
        }
    }

    /// Checked forward-only status change
    pub fn advance(&mut self, to: NotificationStatus) -> Result<(), ModelError> {
        if !self.status.can_transition(to) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Digest grouping strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    ByType,
    ByCategory,
    ByAuthor,
    ByTime,
    Smart,
}

impl GroupingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingStrategy::ByType => "by_type",
            GroupingStrategy::ByCategory => "by_category",
            GroupingStrategy::ByAuthor => "by_author",
            GroupingStrategy::ByTime => "by_time",
            GroupingStrategy::Smart => "smart",
        }
    }
}

/// Synthesized digest summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub title: String,
    pub message: String,
    pub count: usize,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
}

/// A bundle of notifications delivered as one digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notifications: Vec<Notification>,
    pub strategy: GroupingStrategy,
    /// Max priority across members
    pub priority: NotificationPriority,
    pub summary: GroupSummary,
    pub created_at: DateTime<Utc>,
}

impl NotificationGroup {
    pub fn new(
        user_id: Uuid,
        notifications: Vec<Notification>,
        strategy: GroupingStrategy,
        summary: GroupSummary,
        now: DateTime<Utc>,
    ) -> Self {
        let priority = notifications
            .iter()
            .map(|n| n.priority)
            .max_by_key(|p| p.rank())
            .unwrap_or(NotificationPriority::Low);
        Self {
            id: Uuid::new_v4(),
            user_id,
            notifications,
            strategy,
            priority,
            summary,
            created_at: now,
        }
    }
}

/// Aggregate engagement metrics supplied by the content store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentEngagement {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
    pub completion_rate: f64,
    pub avg_time_spent_secs: f64,
    pub urgency_score: f64,
}

/// Content record, read-only from this engine's perspective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub entities: Vec<String>,
    pub tags: Vec<String>,
    /// Sentiment in [-1, 1]
    pub sentiment_score: f64,
    /// Editorial quality in [0, 1]
    pub quality_score: f64,
    pub publish_time: DateTime<Utc>,
    pub author: String,
    pub engagement: ContentEngagement,
}

/// Hourly/daily activity shape derived from event history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingPatterns {
    pub hourly_activity: [f64; 24],
    pub daily_activity: [f64; 7],
    pub peak_hours: Vec<u32>,
    pub quiet_hours: Vec<u32>,
    pub avg_session_duration_secs: f64,
    pub avg_reading_speed_wpm: f64,
    pub avg_completion_rate: f64,
    /// 1 - coefficient of variation of the hourly histogram
    pub consistency: f64,
}

impl Default for ReadingPatterns {
    fn default() -> Self {
        Self {
            hourly_activity: [0.0; 24],
            daily_activity: [0.0; 7],
            peak_hours: Vec::new(),
            quiet_hours: Vec::new(),
            avg_session_duration_secs: 0.0,
            avg_reading_speed_wpm: 0.0,
            avg_completion_rate: 0.0,
            consistency: 0.0,
        }
    }
}

/// Distribution over sentiment buckets the user engages with
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SentimentPreferences {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
}

impl Default for SentimentPreferences {
    fn default() -> Self {
        Self {
            positive: 1.0 / 3.0,
            neutral: 1.0 / 3.0,
            negative: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyTier {
    Low,
    Normal,
    High,
}

/// User-facing notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub frequency: FrequencyTier,
    pub max_per_day: u32,
    pub enabled_types: Vec<NotificationType>,
    pub enabled_channels: Vec<NotificationChannel>,
    pub allow_grouping: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: FrequencyTier::Normal,
            max_per_day: 50,
            enabled_types: NotificationType::all(),
            enabled_channels: NotificationChannel::all(),
            allow_grouping: true,
        }
    }
}

/// Compact engagement history entry kept on the profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub event_type: EventType,
    pub content_id: Option<Uuid>,
    pub category: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-category interest trajectory label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterestEvolution {
    Emerging,
    Declining,
    Seasonal,
    Stable,
}

/// Learned per-user profile. Created lazily on first event, mutated
/// incrementally, decayed on recompute; never hard-deleted except
/// explicit erasure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    /// Interest name -> weight; active weights sum to 1
    pub interests: HashMap<String, f64>,
    pub interest_evolution: HashMap<String, InterestEvolution>,
    pub reading_patterns: ReadingPatterns,
    /// Bounded to the last MAX_ENGAGEMENT_HISTORY events
    pub engagement_history: VecDeque<EngagementRecord>,
    /// Per-channel affinity in [0, 1]
    pub device_preferences: HashMap<NotificationChannel, f64>,
    pub sentiment_preferences: SentimentPreferences,
    pub notification_preferences: NotificationPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            interests: HashMap::new(),
            interest_evolution: HashMap::new(),
            reading_patterns: ReadingPatterns::default(),
            engagement_history: VecDeque::new(),
            device_preferences: HashMap::new(),
            sentiment_preferences: SentimentPreferences::default(),
            notification_preferences: NotificationPreferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append to the bounded engagement history
    pub fn record_engagement(&mut self, record: EngagementRecord) {
        self.engagement_history.push_back(record);
        while self.engagement_history.len() > MAX_ENGAGEMENT_HISTORY {
            self.engagement_history.pop_front();
        }
    }

    pub fn is_peak_hour(&self, hour: u32) -> bool {
        self.reading_patterns.peak_hours.contains(&hour)
    }

    pub fn is_quiet_hour(&self, hour: u32) -> bool {
        self.reading_patterns.quiet_hours.contains(&hour)
    }

    pub fn channel_affinity(&self, channel: NotificationChannel) -> f64 {
        self.device_preferences.get(&channel).copied().unwrap_or(0.5)
    }

    pub fn interest(&self, name: &str) -> f64 {
        self.interests.get(name).copied().unwrap_or(0.0)
    }
}

/// Notification text template with `{placeholder}` substitution slots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub title_template: String,
    pub message_template: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization_round_trip() {
        let json = serde_json::to_string(&EventType::ReadComplete).unwrap();
        assert_eq!(json, "\"read_complete\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::ReadComplete);
    }

    #[test]
    fn test_deep_engagement_classification() {
        assert!(EventType::ReadComplete.is_deep_engagement());
        assert!(EventType::Share.is_deep_engagement());
        assert!(!EventType::Scroll.is_deep_engagement());
        assert!(!EventType::PageView.is_deep_engagement());
    }

    #[test]
    fn test_priority_rank_ordering() {
        assert!(NotificationPriority::Critical.rank() > NotificationPriority::High.rank());
        assert!(NotificationPriority::High.rank() > NotificationPriority::Medium.rank());
        assert!(NotificationPriority::Medium.rank() > NotificationPriority::Low.rank());
    }

    #[test]
    fn test_status_machine_forward_only() {
        use NotificationStatus::*;
        assert!(Pending.can_transition(Scheduled));
        assert!(Pending.can_transition(Blocked));
        assert!(Scheduled.can_transition(Sent));
        assert!(Sent.can_transition(Delivered));
        assert!(Delivered.can_transition(Read));

        // No backward transitions
        assert!(!Sent.can_transition(Pending));
        assert!(!Blocked.can_transition(Pending));
        assert!(!Read.can_transition(Delivered));
        assert!(!Scheduled.can_transition(Pending));
    }

    #[test]
    fn test_notification_advance_rejects_backward() {
        let mut n = Notification::new(
            Uuid::new_v4(),
            NotificationType::BreakingNews,
            NotificationPriority::High,
            Utc::now(),
        );
        n.advance(NotificationStatus::Sent).unwrap();
        let err = n.advance(NotificationStatus::Pending).unwrap_err();
        assert!(matches!(err, ModelError::InvalidTransition { .. }));
        assert_eq!(n.status, NotificationStatus::Sent);
    }

    #[test]
    fn test_group_priority_is_max_of_members() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let low = Notification::new(
            user_id,
            NotificationType::Recommendation,
            NotificationPriority::Low,
            now,
        );
        let high = Notification::new(
            user_id,
            NotificationType::BreakingNews,
            NotificationPriority::High,
            now,
        );
        let group = NotificationGroup::new(
            user_id,
            vec![low, high],
            GroupingStrategy::ByType,
            GroupSummary {
                title: "t".to_string(),
                message: "m".to_string(),
                count: 2,
                categories: vec![],
                authors: vec![],
            },
            now,
        );
        assert_eq!(group.priority, NotificationPriority::High);
    }

    #[test]
    fn test_engagement_history_bounded() {
        let mut profile = UserProfile::new(Uuid::new_v4(), Utc::now());
        for _ in 0..(MAX_ENGAGEMENT_HISTORY + 50) {
            profile.record_engagement(EngagementRecord {
                event_type: EventType::Click,
                content_id: None,
                category: None,
                timestamp: Utc::now(),
            });
        }
        assert_eq!(profile.engagement_history.len(), MAX_ENGAGEMENT_HISTORY);
    }

    #[test]
    fn test_event_metadata_extra_bounded() {
        let mut metadata = EventMetadata::default();
        for i in 0..(MAX_EXTRA_FIELDS + 1) {
            metadata
                .extra
                .insert(format!("k{}", i), serde_json::json!(i));
        }
        assert!(metadata.validate().is_err());
    }
}
