// ============================================
// Decision Pipeline
// ============================================
//
// The orchestrator: builds candidate notifications (template
// personalization + score vector), then runs the fixed short-circuiting
// decision order — preferences, rate limit, dedup, timing, aggregation,
// dispatch. Blocks are terminal decisions, not errors. Scheduled
// notifications re-enter the pipeline at the rate-limit step when due.

use super::aggregator::Aggregator;
use super::dedup::AntiDuplicationEngine;
use super::rate_limiter::RateLimiter;
use super::scheduler::DeliveryScheduler;
use super::{DeliveryError, Result};
use crate::metrics;
use crate::models::{
    BehaviorEvent, ContentItem, DeliveryStatus, DeviceInfo, EngagementRecord, EventMetadata,
    EventType, Notification, NotificationChannel, NotificationGroup, NotificationPriority,
    NotificationStatus, NotificationType, UserProfile,
};
use crate::services::profile_builder::{BehaviorAggregator, InterestProfileBuilder};
use crate::services::realtime::{
    ReadingAnalyzer, ReadingSession, RealtimeProcessor, RealtimeUpdate,
};
use crate::services::scoring::{
    EngagementScorer, ScoringContext, TimingContext, TimingPredictor,
};
use crate::stores::{
    ChannelProvider, ContentStore, InMemoryEventHistory, InMemoryNotificationLog, ProfileStore,
    TemplateStore,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inbound behavior event payload
#[derive(Debug, Clone)]
pub struct TrackBehaviorRequest {
    pub user_id: Uuid,
    pub session_id: String,
    pub event_type: EventType,
    pub content_id: Option<Uuid>,
    pub metadata: EventMetadata,
    pub timestamp: Option<DateTime<Utc>>,
    pub device: Option<DeviceInfo>,
}

/// Inbound notification request
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub content_id: Option<Uuid>,
    pub custom_data: HashMap<String, String>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<NotificationChannel>>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl CreateRequest {
    pub fn new(user_id: Uuid, notification_type: NotificationType) -> Self {
        Self {
            user_id,
            notification_type,
            content_id: None,
            custom_data: HashMap::new(),
            priority: None,
            channels: None,
            scheduled_time: None,
        }
    }
}

/// Terminal pipeline decision for one candidate
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent {
        notification: Notification,
    },
    Blocked {
        notification: Notification,
        reason: String,
        retry_after_secs: Option<i64>,
    },
    Scheduled {
        notification: Notification,
        due_at: DateTime<Utc>,
    },
    Aggregated {
        group: NotificationGroup,
    },
    Failed {
        notification: Notification,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Optimal times further out than this get scheduled instead of sent
    pub immediate_window_minutes: i64,
    /// Profile rebuild cadence in ingested events
    pub rebuild_every_events: u32,
    /// Word-count assumption when content length is unknown
    pub assumed_word_count: u32,
    /// Recent-delivery lookback feeding scoring and dedup
    pub recent_lookback_hours: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            immediate_window_minutes: 90,
            rebuild_every_events: 20,
            assumed_word_count: 500,
            recent_lookback_hours: 24,
        }
    }
}

/// The engine facade: event ingestion on one side, notification
/// decisions on the other.
pub struct NotificationEngine {
    profile_store: Arc<dyn ProfileStore>,
    content_store: Arc<dyn ContentStore>,
    template_store: Arc<dyn TemplateStore>,
    channel_provider: Arc<dyn ChannelProvider>,

    pub realtime: RealtimeProcessor,
    pub scorer: EngagementScorer,
    pub timing: TimingPredictor,
    pub dedup: AntiDuplicationEngine,
    pub rate_limiter: RateLimiter,
    pub aggregator: Aggregator,
    pub scheduler: Arc<DeliveryScheduler>,

    event_history: InMemoryEventHistory,
    notification_log: InMemoryNotificationLog,
    reading_analyzer: ReadingAnalyzer,
    behavior_aggregator: BehaviorAggregator,
    interest_builder: InterestProfileBuilder,
    event_counters: DashMap<Uuid, u32>,
    last_sent: DashMap<Uuid, DateTime<Utc>>,
    config: PipelineConfig,
}

impl NotificationEngine {
    pub fn new(
        profile_store: Arc<dyn ProfileStore>,
        content_store: Arc<dyn ContentStore>,
        template_store: Arc<dyn TemplateStore>,
        channel_provider: Arc<dyn ChannelProvider>,
    ) -> Self {
        Self::with_config(
            profile_store,
            content_store,
            template_store,
            channel_provider,
            PipelineConfig::default(),
        )
    }

    pub fn with_config(
        profile_store: Arc<dyn ProfileStore>,
        content_store: Arc<dyn ContentStore>,
        template_store: Arc<dyn TemplateStore>,
        channel_provider: Arc<dyn ChannelProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            profile_store,
            content_store,
            template_store,
            channel_provider,
            realtime: RealtimeProcessor::default(),
            scorer: EngagementScorer::default(),
            timing: TimingPredictor::default(),
            dedup: AntiDuplicationEngine::default(),
            rate_limiter: RateLimiter::default(),
            aggregator: Aggregator::default(),
            scheduler: Arc::new(DeliveryScheduler::new()),
            event_history: InMemoryEventHistory::default(),
            notification_log: InMemoryNotificationLog::default(),
            reading_analyzer: ReadingAnalyzer::default(),
            behavior_aggregator: BehaviorAggregator::default(),
            interest_builder: InterestProfileBuilder::default(),
            event_counters: DashMap::new(),
            last_sent: DashMap::new(),
            config,
        }
    }

    /// Ingest one behavior event: realtime state, bounded history,
    /// incremental profile maintenance, periodic rebuild.
    pub async fn track_behavior(&self, request: TrackBehaviorRequest) -> Result<RealtimeUpdate> {
        let now = Utc::now();
        let timestamp = request.timestamp.unwrap_or(now);
        if timestamp > now + Duration::minutes(5) {
            return Err(DeliveryError::Validation(
                "event timestamp is in the future".to_string(),
            ));
        }

        let mut metadata = request.metadata;
        if let Some(device) = request.device {
            metadata.device = Some(device);
        }
        let mut event = BehaviorEvent::new(
            request.user_id,
            request.session_id,
            request.event_type,
            timestamp,
        )
        .with_metadata(metadata);
        event.content_id = request.content_id;
        event.validate()?;

        self.event_history.record(&event);
        let update = self.realtime.process_event(&event);

        let mut profile = self.load_or_create_profile(request.user_id, now).await?;

        let category = match event.content_id {
            Some(content_id) => self
                .content_store
                .get(content_id)
                .await?
                .map(|c| c.category),
            None => None,
        };
        profile.record_engagement(EngagementRecord {
            event_type: event.event_type,
            content_id: event.content_id,
            category,
            timestamp,
        });

        // Notification feedback loops back into the scorer, the adaptive
        // rate limiter, and channel affinity
        if matches!(
            event.event_type,
            EventType::NotificationClick | EventType::NotificationDismiss
        ) {
            let engaged = event.event_type == EventType::NotificationClick;
            self.scorer.record_feedback(request.user_id, engaged);
            self.rate_limiter
                .record_engagement(request.user_id, engaged, now);
            if let Some(channel) = event
                .metadata
                .extra
                .get("channel")
                .and_then(|v| v.as_str())
                .and_then(parse_channel)
            {
                InterestProfileBuilder::update_channel_affinity(&mut profile, channel, engaged);
            }
        }

        let count = {
            let mut counter = self.event_counters.entry(request.user_id).or_insert(0);
            *counter += 1;
            *counter
        };
        if count % self.config.rebuild_every_events == 0 {
            self.rebuild_profile(&mut profile, now).await?;
        }

        profile.updated_at = now;
        self.profile_store.save(&profile).await?;
        Ok(update)
    }

    /// Full rebuild of the learned profile from buffered history
    async fn rebuild_profile(&self, profile: &mut UserProfile, now: DateTime<Utc>) -> Result<()> {
        let events = self.event_history.events_for(profile.user_id);
        if events.is_empty() {
            return Ok(());
        }

        let mut contents: HashMap<Uuid, ContentItem> = HashMap::new();
        for content_id in events.iter().filter_map(|e| e.content_id) {
            if contents.contains_key(&content_id) {
                continue;
            }
            match self.content_store.get(content_id).await {
                Ok(Some(content)) => {
                    contents.insert(content_id, content);
                }
                Ok(None) => {}
                Err(e) => warn!(content_id = %content_id, error = %e, "Content lookup failed"),
            }
        }

        let sessions: Vec<ReadingSession> = contents
            .keys()
            .filter_map(|content_id| {
                let content_events = self
                    .event_history
                    .content_events(profile.user_id, *content_id);
                if content_events.len() < 2 {
                    return None;
                }
                self.reading_analyzer
                    .analyze(&content_events, self.config.assumed_word_count)
                    .ok()
            })
            .collect();

        self.interest_builder
            .rebuild(profile, &events, &contents, &sessions, now);

        let summary = self.behavior_aggregator.aggregate(profile.user_id, &events, now);
        debug!(
            user_id = %profile.user_id,
            primary_pattern = ?summary.primary_pattern,
            churn_risk = summary.churn_risk,
            reliable = summary.reliable,
            "Behavior summary refreshed"
        );
        Ok(())
    }

    /// Build a candidate (personalized text + score vector) and run the
    /// decision pipeline on it.
    pub async fn create_and_send(&self, request: CreateRequest) -> Result<SendOutcome> {
        if let Some(channels) = &request.channels {
            if channels.is_empty() {
                return Err(DeliveryError::Validation(
                    "channels list is empty".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let profile = self.load_or_create_profile(request.user_id, now).await?;

        let content = match request.content_id {
            Some(content_id) => {
                let found = self.content_store.get(content_id).await?;
                if found.is_none() {
                    warn!(content_id = %content_id, "Content missing, scoring degraded");
                }
                found
            }
            None => None,
        };

        let priority = request
            .priority
            .unwrap_or_else(|| default_priority(request.notification_type));
        let mut notification =
            Notification::new(request.user_id, request.notification_type, priority, now);
        notification.content_id = request.content_id;
        notification.channels = request
            .channels
            .clone()
            .unwrap_or_else(|| vec![NotificationChannel::Push]);
        notification.custom_data = request.custom_data.clone();
        notification.scheduled_at = request.scheduled_time;
        if let Some(content) = &content {
            notification
                .custom_data
                .entry("category".to_string())
                .or_insert_with(|| content.category.clone());
            notification
                .custom_data
                .entry("author".to_string())
                .or_insert_with(|| content.author.clone());
        }

        self.personalize(&mut notification, content.as_ref()).await?;

        // Score once at creation; later steps reuse the stored vector
        if let Some(content) = &content {
            let since = now - Duration::hours(self.config.recent_lookback_hours);
            let recent_ids = self
                .notification_log
                .recent_content_ids(request.user_id, since);
            let mut recent_contents = Vec::new();
            for content_id in recent_ids.iter().copied().take(10) {
                if let Ok(Some(item)) = self.content_store.get(content_id).await {
                    recent_contents.push(item);
                }
            }
            let context = ScoringContext {
                proposed_time: request.scheduled_time.unwrap_or(now),
                channel: notification
                    .channels
                    .first()
                    .copied()
                    .unwrap_or(NotificationChannel::Push),
                recent_notification_ids: recent_ids,
                recent_contents,
            };
            let score = self.scorer.score(&profile, content, &context);
            notification.score = Some(score.vector);
        }

        self.process(notification, profile, content, now, true).await
    }

    /// The fixed decision order. `allow_scheduling` is false on re-entry
    /// from the scheduler so a due notification cannot loop forever.
    async fn process(
        &self,
        mut notification: Notification,
        profile: UserProfile,
        content: Option<ContentItem>,
        now: DateTime<Utc>,
        allow_scheduling: bool,
    ) -> Result<SendOutcome> {
        // Preference gate before any stateful step
        let preferences = &profile.notification_preferences;
        if !preferences.enabled {
            return self.block(notification, "notifications disabled", None);
        }
        if !preferences
            .enabled_types
            .contains(&notification.notification_type)
        {
            return self.block(notification, "notification type disabled", None);
        }
        let channels: Vec<NotificationChannel> = notification
            .channels
            .iter()
            .copied()
            .filter(|c| preferences.enabled_channels.contains(c))
            .collect();
        if channels.is_empty() {
            return self.block(notification, "no enabled channel", None);
        }
        notification.channels = channels;

        // 1. Rate limiter
        let primary_channel = notification.channels[0];
        let decision = self.rate_limiter.check_and_record(
            notification.user_id,
            notification.notification_type,
            notification.priority,
            primary_channel,
            &profile,
            now,
        );
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "rate limited".to_string());
            return self.block(notification, &reason, decision.retry_after_secs);
        }

        // 2. Anti-duplication
        let since = now - Duration::hours(self.config.recent_lookback_hours);
        let recent = self.notification_log.recent(notification.user_id, since);
        let check = self.dedup.check_and_record(&notification, &recent, now);
        if check.is_duplicate {
            let reason = check
                .reason
                .unwrap_or_else(|| "duplicate notification".to_string());
            return self.block(notification, &reason, None);
        }

        // 3. Timing: future optimal time parks the candidate in the
        // scheduler; re-entry restarts at the rate limiter
        if allow_scheduling && notification.priority != NotificationPriority::Critical {
            let due_at = match notification.scheduled_at {
                Some(explicit) if explicit > now + Duration::minutes(1) => Some(explicit),
                Some(_) => None,
                None => {
                    let fallback = neutral_content_for(&notification);
                    let prediction = self.timing.predict(
                        &profile,
                        content.as_ref().unwrap_or(&fallback),
                        &TimingContext {
                            now,
                            last_notification_at: self
                                .last_sent
                                .get(&notification.user_id)
                                .map(|t| *t),
                            primary_device: None,
                        },
                    );
                    let horizon = now + Duration::minutes(self.config.immediate_window_minutes);
                    (prediction.optimal_time > horizon).then_some(prediction.optimal_time)
                }
            };
            if let Some(due_at) = due_at {
                notification.advance(NotificationStatus::Scheduled)?;
                notification.scheduled_at = Some(due_at);
                self.scheduler.schedule(notification.clone(), due_at);
                metrics::observe_decision("scheduled");
                return Ok(SendOutcome::Scheduled {
                    notification,
                    due_at,
                });
            }
        }

        // 4. Aggregation
        if profile.notification_preferences.allow_grouping
            && notification.priority.rank() <= NotificationPriority::Medium.rank()
        {
            if let Some(group) = self.aggregator.try_group_candidate(&notification, now) {
                notification.advance(NotificationStatus::Aggregated)?;
                notification.decision_reason = Some("merged into digest".to_string());
                metrics::observe_decision("aggregated");
                self.dispatch_digest(&group, &notification.channels, now).await;
                return Ok(SendOutcome::Aggregated { group });
            }
        }

        // 5. Dispatch to every requested channel
        let mut any_success = false;
        for channel in notification.channels.clone() {
            let result = match self.channel_provider.deliver(&notification, channel).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        notification_id = %notification.id,
                        channel = channel.as_str(),
                        error = %e,
                        "Channel delivery errored"
                    );
                    crate::models::DeliveryResult {
                        channel,
                        status: DeliveryStatus::Failed,
                        message_id: None,
                        error: Some(e.to_string()),
                        attempted_at: now,
                        delivered_at: None,
                    }
                }
            };
            any_success = any_success || result.status == DeliveryStatus::Success;
            notification.delivery_results.push(result);
        }

        if any_success {
            notification.advance(NotificationStatus::Sent)?;
            notification.sent_at = Some(now);
            self.notification_log.record(&notification);
            self.last_sent.insert(notification.user_id, now);
            metrics::observe_decision("sent");
            info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                channels = notification.channels.len(),
                "Notification sent"
            );
            Ok(SendOutcome::Sent { notification })
        } else {
            notification.advance(NotificationStatus::Failed)?;
            metrics::observe_decision("failed");
            Ok(SendOutcome::Failed { notification })
        }
    }

    fn block(
        &self,
        mut notification: Notification,
        reason: &str,
        retry_after_secs: Option<i64>,
    ) -> Result<SendOutcome> {
        notification.advance(NotificationStatus::Blocked)?;
        notification.decision_reason = Some(reason.to_string());
        metrics::observe_decision("blocked");
        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            reason = reason,
            "Notification blocked"
        );
        Ok(SendOutcome::Blocked {
            notification,
            reason: reason.to_string(),
            retry_after_secs,
        })
    }

    /// A formed digest goes straight out as one notification
    async fn dispatch_digest(
        &self,
        group: &NotificationGroup,
        channels: &[NotificationChannel],
        now: DateTime<Utc>,
    ) {
        let mut digest = Notification::new(
            group.user_id,
            NotificationType::Digest,
            group.priority,
            now,
        );
        digest.title = group.summary.title.clone();
        digest.message = group.summary.message.clone();
        digest.channels = channels.to_vec();

        let mut any_success = false;
        for channel in channels {
            match self.channel_provider.deliver(&digest, *channel).await {
                Ok(result) => {
                    any_success = any_success || result.status == DeliveryStatus::Success;
                    digest.delivery_results.push(result);
                }
                Err(e) => warn!(
                    group_id = %group.id,
                    channel = channel.as_str(),
                    error = %e,
                    "Digest delivery errored"
                ),
            }
        }
        if any_success {
            if digest.advance(NotificationStatus::Sent).is_ok() {
                digest.sent_at = Some(now);
            }
            self.notification_log.record(&digest);
            self.last_sent.insert(group.user_id, now);
            info!(
                group_id = %group.id,
                member_count = group.notifications.len(),
                "Digest sent"
            );
        }
    }

    /// Re-enter due scheduled notifications through the pipeline.
    /// Returns the outcomes in drain order.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Vec<SendOutcome> {
        let due = self.scheduler.drain_due(now);
        let mut outcomes = Vec::new();
        for notification in due {
            match self.reprocess(notification, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Scheduled re-entry failed"),
            }
        }
        outcomes
    }

    async fn reprocess(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        let profile = self
            .load_or_create_profile(notification.user_id, now)
            .await?;
        let content = match notification.content_id {
            Some(content_id) => self.content_store.get(content_id).await?,
            None => None,
        };
        self.process(notification, profile, content, now, false)
            .await
    }

    /// Spawn the background worker that waits on the scheduler and
    /// re-enters due notifications.
    pub fn spawn_scheduler_worker(engine: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let due = engine.scheduler.wait_due().await;
                for notification in due {
                    let now = Utc::now();
                    if let Err(e) = engine.reprocess(notification, now).await {
                        warn!(error = %e, "Scheduled re-entry failed");
                    }
                }
            }
        })
    }

    /// Idempotent cancellation of a scheduled notification
    pub fn cancel_scheduled(&self, notification_id: Uuid) {
        self.scheduler.cancel(notification_id);
    }

    /// Long-term behavior view over the user's buffered history, for
    /// re-engagement and moderation consumers
    pub fn behavior_summary(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> crate::services::profile_builder::BehaviorSummary {
        let events = self.event_history.events_for(user_id);
        self.behavior_aggregator.aggregate(user_id, &events, now)
    }

    /// Explicit erasure: the only hard-delete path for user state
    pub async fn erase_user(&self, user_id: Uuid) -> Result<()> {
        self.profile_store.delete(user_id).await?;
        self.event_history.erase(user_id);
        self.notification_log.erase(user_id);
        self.realtime.erase(user_id);
        self.dedup.erase(user_id);
        self.rate_limiter.erase(user_id);
        self.aggregator.erase(user_id);
        self.scheduler.erase_user(user_id);
        self.event_counters.remove(&user_id);
        self.last_sent.remove(&user_id);
        info!(user_id = %user_id, "User state erased");
        Ok(())
    }

    async fn load_or_create_profile(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UserProfile> {
        match self.profile_store.load(user_id).await? {
            Some(profile) => Ok(profile),
            None => {
                let profile = UserProfile::new(user_id, now);
                self.profile_store.save(&profile).await?;
                Ok(profile)
            }
        }
    }

    /// Fill title/message from the type's template, substituting
    /// {title} {category} {author} {message} {action} {achievement}
    async fn personalize(
        &self,
        notification: &mut Notification,
        content: Option<&ContentItem>,
    ) -> Result<()> {
        let mut values: HashMap<&str, String> = HashMap::new();
        if let Some(content) = content {
            values.insert("title", content.title.clone());
            values.insert("category", content.category.clone());
            values.insert("author", content.author.clone());
        }
        for key in ["title", "category", "author", "message", "action", "achievement"] {
            if let Some(value) = notification.custom_data.get(key) {
                values.insert(key, value.clone());
            }
        }

        match self
            .template_store
            .get(notification.notification_type)
            .await?
        {
            Some(template) => {
                notification.title = render(&template.title_template, &values);
                notification.message = render(&template.message_template, &values);
            }
            None => {
                notification.title = values.get("title").cloned().unwrap_or_else(|| {
                    notification.notification_type.as_str().replace('_', " ")
                });
                notification.message = values.get("message").cloned().unwrap_or_default();
            }
        }
        Ok(())
    }
}

fn render(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    // Unfilled placeholders come out rather than leaking braces
    for key in ["title", "category", "author", "message", "action", "achievement"] {
        out = out.replace(&format!("{{{}}}", key), "");
    }
    out.trim().to_string()
}

fn default_priority(notification_type: NotificationType) -> NotificationPriority {
    match notification_type {
        NotificationType::BreakingNews => NotificationPriority::High,
        NotificationType::System => NotificationPriority::Medium,
        NotificationType::Achievement => NotificationPriority::Medium,
        NotificationType::Recommendation
        | NotificationType::SocialInteraction
        | NotificationType::Digest
        | NotificationType::ReEngagement => NotificationPriority::Low,
    }
}

fn parse_channel(value: &str) -> Option<NotificationChannel> {
    NotificationChannel::all()
        .into_iter()
        .find(|c| c.as_str() == value)
}

/// Placeholder content when a notification carries no content id; keeps
/// the timing predictor's contract whole
fn neutral_content_for(notification: &Notification) -> ContentItem {
    ContentItem {
        id: notification.content_id.unwrap_or_else(Uuid::new_v4),
        title: notification.title.clone(),
        category: notification
            .custom_data
            .get("category")
            .cloned()
            .unwrap_or_default(),
        entities: Vec::new(),
        tags: Vec::new(),
        sentiment_score: 0.0,
        quality_score: 0.5,
        publish_time: notification.created_at,
        author: notification
            .custom_data
            .get("author")
            .cloned()
            .unwrap_or_default(),
        engagement: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{
        InMemoryContentStore, InMemoryProfileStore, InMemoryTemplateStore, StubChannelProvider,
    };

    fn engine_with_provider(provider: Arc<StubChannelProvider>) -> NotificationEngine {
        NotificationEngine::new(
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemoryTemplateStore::new()),
            provider,
        )
    }

    fn engine() -> NotificationEngine {
        engine_with_provider(Arc::new(StubChannelProvider::new()))
    }

    #[tokio::test]
    async fn test_empty_channel_list_rejected() {
        let engine = engine();
        let mut request = CreateRequest::new(Uuid::new_v4(), NotificationType::System);
        request.channels = Some(Vec::new());
        let result = engine.create_and_send(request).await;
        assert!(matches!(result, Err(DeliveryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_disabled_preferences_block_before_rate_limit() {
        let profile_store = Arc::new(InMemoryProfileStore::new());
        let user_id = Uuid::new_v4();
        let mut profile = UserProfile::new(user_id, Utc::now());
        profile.notification_preferences.enabled = false;
        profile_store.save(&profile).await.unwrap();

        let engine = NotificationEngine::new(
            profile_store,
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(StubChannelProvider::new()),
        );

        let mut request = CreateRequest::new(user_id, NotificationType::System);
        request.priority = Some(NotificationPriority::Critical);
        match engine.create_and_send(request).await.unwrap() {
            SendOutcome::Blocked { reason, .. } => {
                assert!(reason.contains("disabled"));
            }
            other => panic!("expected preference block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_critical_system_notification_sends() {
        let provider = Arc::new(StubChannelProvider::new());
        let engine = engine_with_provider(provider.clone());
        let user_id = Uuid::new_v4();

        let mut request = CreateRequest::new(user_id, NotificationType::System);
        request.priority = Some(NotificationPriority::Critical);
        request
            .custom_data
            .insert("title".to_string(), "Password changed".to_string());
        request
            .custom_data
            .insert("message".to_string(), "Review recent activity".to_string());

        match engine.create_and_send(request).await.unwrap() {
            SendOutcome::Sent { notification } => {
                assert_eq!(notification.status, NotificationStatus::Sent);
                assert_eq!(notification.title, "Password changed");
                assert_eq!(notification.message, "Review recent activity");
                assert!(notification.sent_at.is_some());
                assert_eq!(notification.delivery_results.len(), 1);
            }
            other => panic!("expected send, got {:?}", other),
        }
        assert_eq!(provider.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_fail_notification() {
        let provider = Arc::new(StubChannelProvider::failing_on([
            NotificationChannel::Email,
        ]));
        let engine = engine_with_provider(provider);
        let user_id = Uuid::new_v4();

        let mut request = CreateRequest::new(user_id, NotificationType::System);
        request.priority = Some(NotificationPriority::Critical);
        request.channels = Some(vec![NotificationChannel::Email, NotificationChannel::Push]);
        request
            .custom_data
            .insert("title".to_string(), "Heads up".to_string());

        match engine.create_and_send(request).await.unwrap() {
            SendOutcome::Sent { notification } => {
                assert_eq!(notification.delivery_results.len(), 2);
                let failed = notification
                    .delivery_results
                    .iter()
                    .find(|r| r.channel == NotificationChannel::Email)
                    .unwrap();
                assert_eq!(failed.status, DeliveryStatus::Failed);
                assert!(failed.error.is_some());
            }
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_channels_failed_marks_failed() {
        let provider = Arc::new(StubChannelProvider::failing_on([
            NotificationChannel::Push,
        ]));
        let engine = engine_with_provider(provider);

        let mut request = CreateRequest::new(Uuid::new_v4(), NotificationType::System);
        request.priority = Some(NotificationPriority::Critical);
        match engine.create_and_send(request).await.unwrap() {
            SendOutcome::Failed { notification } => {
                assert_eq!(notification.status, NotificationStatus::Failed);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_future_schedule_and_cancel() {
        let engine = engine();
        let user_id = Uuid::new_v4();

        let mut request = CreateRequest::new(user_id, NotificationType::Recommendation);
        request.scheduled_time = Some(Utc::now() + Duration::hours(3));
        let outcome = engine.create_and_send(request).await.unwrap();

        let notification = match outcome {
            SendOutcome::Scheduled { notification, .. } => {
                assert_eq!(notification.status, NotificationStatus::Scheduled);
                notification
            }
            other => panic!("expected schedule, got {:?}", other),
        };
        assert_eq!(engine.scheduler.pending_len(), 1);

        engine.cancel_scheduled(notification.id);
        engine.cancel_scheduled(notification.id);
        assert_eq!(engine.scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_track_behavior_rejects_future_timestamp() {
        let engine = engine();
        let request = TrackBehaviorRequest {
            user_id: Uuid::new_v4(),
            session_id: "s1".to_string(),
            event_type: EventType::PageView,
            content_id: None,
            metadata: EventMetadata::default(),
            timestamp: Some(Utc::now() + Duration::hours(1)),
            device: None,
        };
        assert!(matches!(
            engine.track_behavior(request).await,
            Err(DeliveryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_track_behavior_creates_profile_lazily() {
        let profile_store = Arc::new(InMemoryProfileStore::new());
        let engine = NotificationEngine::new(
            profile_store.clone(),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(StubChannelProvider::new()),
        );
        let user_id = Uuid::new_v4();
        assert!(profile_store.load(user_id).await.unwrap().is_none());

        engine
            .track_behavior(TrackBehaviorRequest {
                user_id,
                session_id: "s1".to_string(),
                event_type: EventType::PageView,
                content_id: None,
                metadata: EventMetadata::default(),
                timestamp: None,
                device: None,
            })
            .await
            .unwrap();

        let profile = profile_store.load(user_id).await.unwrap().unwrap();
        assert_eq!(profile.engagement_history.len(), 1);
    }

    #[tokio::test]
    async fn test_erase_user_clears_state() {
        let profile_store = Arc::new(InMemoryProfileStore::new());
        let engine = NotificationEngine::new(
            profile_store.clone(),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(StubChannelProvider::new()),
        );
        let user_id = Uuid::new_v4();

        engine
            .track_behavior(TrackBehaviorRequest {
                user_id,
                session_id: "s1".to_string(),
                event_type: EventType::PageView,
                content_id: None,
                metadata: EventMetadata::default(),
                timestamp: None,
                device: None,
            })
            .await
            .unwrap();

        engine.erase_user(user_id).await.unwrap();
        assert!(profile_store.load(user_id).await.unwrap().is_none());
        assert!(engine.realtime.snapshot(user_id).is_none());
    }

    #[test]
    fn test_render_substitutes_and_strips() {
        let mut values = HashMap::new();
        values.insert("title", "Big story".to_string());
        values.insert("category", "tech".to_string());
        assert_eq!(
            render("Breaking: {title} in {category}", &values),
            "Breaking: Big story in tech"
        );
        assert_eq!(render("{author} commented", &values), "commented");
    }
}
