// ============================================
// Realtime State Processor
// ============================================
//
// Maintains live per-user state from the event stream: a short ring
// buffer, rolling engagement level, and an anomaly counter. Anomaly
// flags are soft signals for an external moderation process; they never
// block scoring or delivery. Users go inactive after 30 minutes idle and
// are evicted after ~2 hours.

use crate::metrics;
use crate::models::{BehaviorEvent, DeviceInfo, EventType};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// >= 5 events inside 2 seconds
    EventBurst,
    /// Scroll speed above the plausible ceiling
    ImplausibleScrollSpeed,
    /// >= 10 clicks inside 5 seconds
    ClickFlood,
    /// Device or OS changed within 60s of the previous event
    RapidDeviceSwitch,
}

/// Instantaneous follow-up suggested by the processor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    OfferRelatedContent { content_id: Uuid },
    ScheduleReEngagementCheck,
    BackoffNotifications,
}

/// Result of processing a single event
#[derive(Debug, Clone)]
pub struct RealtimeUpdate {
    pub engagement_level: EngagementLevel,
    pub anomalies: Vec<AnomalyKind>,
    pub recommendations: Vec<RecommendedAction>,
    /// True once the user's anomaly count passed the review threshold
    pub flagged_for_review: bool,
}

/// Read-only view of one user's live state
#[derive(Debug, Clone)]
pub struct RealtimeSnapshot {
    pub user_id: Uuid,
    pub last_activity: DateTime<Utc>,
    pub current_session_id: Option<String>,
    pub current_content_id: Option<Uuid>,
    pub engagement_level: EngagementLevel,
    pub anomaly_count: u32,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub buffer_size: usize,
    pub burst_count: usize,
    pub burst_window_secs: i64,
    pub max_scroll_speed: f64,
    pub click_flood_count: usize,
    pub click_flood_window_secs: i64,
    pub device_switch_window_secs: i64,
    /// Anomaly count beyond which the user is flagged for review
    pub review_threshold: u32,
    pub idle_minutes: i64,
    pub evict_hours: i64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: 20,
            burst_count: 5,
            burst_window_secs: 2,
            max_scroll_speed: 5000.0,
            click_flood_count: 10,
            click_flood_window_secs: 5,
            device_switch_window_secs: 60,
            review_threshold: 3,
            idle_minutes: 30,
            evict_hours: 2,
        }
    }
}

struct UserState {
    buffer: VecDeque<BehaviorEvent>,
    last_activity: DateTime<Utc>,
    current_session_id: Option<String>,
    current_content_id: Option<Uuid>,
    last_device: Option<DeviceInfo>,
    last_device_at: Option<DateTime<Utc>>,
    engagement_level: EngagementLevel,
    anomaly_count: u32,
    active: bool,
}

impl UserState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            buffer: VecDeque::new(),
            last_activity: now,
            current_session_id: None,
            current_content_id: None,
            last_device: None,
            last_device_at: None,
            engagement_level: EngagementLevel::Low,
            anomaly_count: 0,
            active: true,
        }
    }
}

/// Sharded live state over all currently active users
pub struct RealtimeProcessor {
    states: DashMap<Uuid, UserState>,
    config: RealtimeConfig,
}

impl RealtimeProcessor {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            states: DashMap::new(),
            config,
        }
    }

    /// Fold one event into the user's live state. The per-user entry lock
    /// serializes updates within a user; other users are unaffected.
    pub fn process_event(&self, event: &BehaviorEvent) -> RealtimeUpdate {
        metrics::observe_event(event.event_type.as_str());

        let mut entry = self
            .states
            .entry(event.user_id)
            .or_insert_with(|| UserState::new(event.timestamp));
        let state = entry.value_mut();

        let anomalies = Self::detect_anomalies(&self.config, state, event);
        for anomaly in &anomalies {
            state.anomaly_count += 1;
            metrics::observe_anomaly();
            debug!(
                user_id = %event.user_id,
                anomaly = ?anomaly,
                count = state.anomaly_count,
                "Anomaly detected"
            );
        }

        state.buffer.push_back(event.clone());
        while state.buffer.len() > self.config.buffer_size {
            state.buffer.pop_front();
        }
        state.last_activity = event.timestamp;
        state.active = true;
        state.current_session_id = Some(event.session_id.clone());
        if event.content_id.is_some() {
            state.current_content_id = event.content_id;
        }
        if let Some(device) = &event.metadata.device {
            state.last_device = Some(device.clone());
            state.last_device_at = Some(event.timestamp);
        }

        state.engagement_level = Self::engagement_level(&state.buffer);

        let recommendations = Self::recommendations(event);
        let flagged_for_review = state.anomaly_count > self.config.review_threshold;
        if flagged_for_review && !anomalies.is_empty() {
            info!(
                user_id = %event.user_id,
                anomaly_count = state.anomaly_count,
                "User flagged for review"
            );
        }

        RealtimeUpdate {
            engagement_level: state.engagement_level,
            anomalies,
            recommendations,
            flagged_for_review,
        }
    }

    fn detect_anomalies(
        config: &RealtimeConfig,
        state: &UserState,
        event: &BehaviorEvent,
    ) -> Vec<AnomalyKind> {
        let mut anomalies = Vec::new();

        // Burst: enough buffered events inside the window, counting this one
        let burst_cutoff = event.timestamp - Duration::seconds(config.burst_window_secs);
        let recent = state
            .buffer
            .iter()
            .filter(|e| e.timestamp >= burst_cutoff)
            .count()
            + 1;
        if recent >= config.burst_count {
            anomalies.push(AnomalyKind::EventBurst);
        }

        if let Some(speed) = event.metadata.scroll_speed {
            if speed > config.max_scroll_speed {
                anomalies.push(AnomalyKind::ImplausibleScrollSpeed);
            }
        }

        if event.event_type == EventType::Click {
            let click_cutoff =
                event.timestamp - Duration::seconds(config.click_flood_window_secs);
            let clicks = state
                .buffer
                .iter()
                .filter(|e| e.event_type == EventType::Click && e.timestamp >= click_cutoff)
                .count()
                + 1;
            if clicks >= config.click_flood_count {
                anomalies.push(AnomalyKind::ClickFlood);
            }
        }

        if let (Some(device), Some(prev), Some(prev_at)) = (
            event.metadata.device.as_ref(),
            state.last_device.as_ref(),
            state.last_device_at,
        ) {
            let changed = device.device_type != prev.device_type || device.os != prev.os;
            let gap = event.timestamp - prev_at;
            if changed && gap < Duration::seconds(config.device_switch_window_secs) {
                anomalies.push(AnomalyKind::RapidDeviceSwitch);
            }
        }

        anomalies
    }

    /// Rolling engagement from the ratio of deep event types in the buffer
    fn engagement_level(buffer: &VecDeque<BehaviorEvent>) -> EngagementLevel {
        if buffer.is_empty() {
            return EngagementLevel::Low;
        }
        let deep = buffer
            .iter()
            .filter(|e| e.event_type.is_deep_engagement())
            .count();
        let ratio = deep as f64 / buffer.len() as f64;
        if ratio >= 0.3 {
            EngagementLevel::High
        } else if ratio >= 0.1 {
            EngagementLevel::Medium
        } else {
            EngagementLevel::Low
        }
    }

    fn recommendations(event: &BehaviorEvent) -> Vec<RecommendedAction> {
        match event.event_type {
            EventType::ReadComplete => event
                .content_id
                .map(|content_id| vec![RecommendedAction::OfferRelatedContent { content_id }])
                .unwrap_or_default(),
            EventType::SessionEnd => vec![RecommendedAction::ScheduleReEngagementCheck],
            EventType::NotificationDismiss => vec![RecommendedAction::BackoffNotifications],
            _ => Vec::new(),
        }
    }

    pub fn snapshot(&self, user_id: Uuid) -> Option<RealtimeSnapshot> {
        self.states.get(&user_id).map(|state| RealtimeSnapshot {
            user_id,
            last_activity: state.last_activity,
            current_session_id: state.current_session_id.clone(),
            current_content_id: state.current_content_id,
            engagement_level: state.engagement_level,
            anomaly_count: state.anomaly_count,
            active: state.active,
        })
    }

    /// Mark idle users inactive and evict long-idle state.
    /// Returns (marked_inactive, evicted).
    pub fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let idle_cutoff = now - Duration::minutes(self.config.idle_minutes);
        let evict_cutoff = now - Duration::hours(self.config.evict_hours);

        let mut marked = 0;
        for mut entry in self.states.iter_mut() {
            if entry.active && entry.last_activity < idle_cutoff {
                entry.active = false;
                marked += 1;
            }
        }

        let before = self.states.len();
        self.states
            .retain(|_, state| state.last_activity >= evict_cutoff);
        let evicted = before - self.states.len();

        if marked > 0 || evicted > 0 {
            info!(marked_inactive = marked, evicted = evicted, "Realtime sweep");
        }
        (marked, evicted)
    }

    pub fn erase(&self, user_id: Uuid) {
        self.states.remove(&user_id);
    }

    pub fn active_users(&self) -> usize {
        self.states.iter().filter(|s| s.active).count()
    }
}

impl Default for RealtimeProcessor {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}
