// ============================================
// Rate Limiter
// ============================================
//
// Multi-scope sliding-window quotas over notification sends. Rules are
// data: a scope, caps per granularity, a priority (higher evaluated
// first), optional match conditions, and optional bypass exceptions.
// An adaptive layer moves each user's hourly limit with their rolling
// notification engagement.
//
// The window check and the history write happen while holding every
// applicable scope lock, acquired in sorted key order, so concurrent
// candidates cannot both squeeze past a boundary.

use super::rules::{matches_all, RuleCondition};
use crate::models::{NotificationChannel, NotificationPriority, NotificationType, UserProfile};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    User,
    Channel,
    Type,
}

/// Caps per sliding-window granularity; unset granularities don't apply
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowCaps {
    pub per_second: Option<u32>,
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

impl WindowCaps {
    fn iter(&self) -> impl Iterator<Item = (Duration, u32)> {
        [
            (Duration::seconds(1), self.per_second),
            (Duration::minutes(1), self.per_minute),
            (Duration::hours(1), self.per_hour),
            (Duration::days(1), self.per_day),
        ]
        .into_iter()
        .filter_map(|(window, cap)| cap.map(|c| (window, c)))
    }
}

/// A bypass granted past a matched cap
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitException {
    /// Minimum priority that bypasses
    pub min_priority: Option<NotificationPriority>,
    /// Types that bypass
    #[serde(default)]
    pub types: Vec<NotificationType>,
    /// Local-hour range [start, end) during which the bypass holds
    pub hours: Option<(u32, u32)>,
}

impl RateLimitException {
    fn matches(
        &self,
        priority: NotificationPriority,
        notification_type: NotificationType,
        hour: u32,
    ) -> bool {
        if let Some(min) = self.min_priority {
            if priority.rank() < min.rank() {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&notification_type) {
            return false;
        }
        if let Some((start, end)) = self.hours {
            if !(start..end).contains(&hour) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub name: String,
    pub scope: RuleScope,
    /// Higher priority rules are evaluated first
    pub priority: i32,
    pub caps: WindowCaps,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub exceptions: Vec<RateLimitException>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub used: u32,
    pub limit: u32,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub retry_after_secs: Option<i64>,
    pub suggested_delay_secs: Option<i64>,
    pub quota: Option<Quota>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Seed for the adaptive per-user hourly limit
    pub default_hourly_limit: u32,
    pub adaptive_floor: u32,
    pub adaptive_ceiling: u32,
    /// Rolling engagement window (delivered notifications)
    pub engagement_window: usize,
    /// Engagement ratio under which the limit halves immediately
    pub halve_below: f64,
    /// History retention
    pub history_hours: i64,
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_hourly_limit: 30,
            adaptive_floor: 5,
            adaptive_ceiling: 60,
            engagement_window: 20,
            halve_below: 0.2,
            history_hours: 24,
            rules: vec![
                RateLimitRule {
                    name: "global-burst".to_string(),
                    scope: RuleScope::Global,
                    priority: 200,
                    caps: WindowCaps {
                        per_second: Some(200),
                        ..Default::default()
                    },
                    conditions: Vec::new(),
                    exceptions: Vec::new(),
                },
                RateLimitRule {
                    name: "user-hourly".to_string(),
                    scope: RuleScope::User,
                    priority: 100,
                    caps: WindowCaps {
                        per_minute: Some(5),
                        per_hour: Some(30),
                        ..Default::default()
                    },
                    conditions: Vec::new(),
                    exceptions: vec![RateLimitException {
                        min_priority: Some(NotificationPriority::Critical),
                        ..Default::default()
                    }],
                },
                RateLimitRule {
                    name: "user-daily".to_string(),
                    scope: RuleScope::User,
                    priority: 90,
                    caps: WindowCaps {
                        per_day: Some(100),
                        ..Default::default()
                    },
                    conditions: Vec::new(),
                    exceptions: vec![RateLimitException {
                        min_priority: Some(NotificationPriority::Critical),
                        ..Default::default()
                    }],
                },
                RateLimitRule {
                    name: "breaking-hourly".to_string(),
                    scope: RuleScope::Type,
                    priority: 80,
                    caps: WindowCaps {
                        per_hour: Some(5),
                        ..Default::default()
                    },
                    conditions: vec![RuleCondition::new(
                        "notification_type",
                        super::rules::FieldOp::Eq,
                        json!("breaking_news"),
                    )],
                    exceptions: Vec::new(),
                },
                RateLimitRule {
                    name: "email-daily".to_string(),
                    scope: RuleScope::Channel,
                    priority: 70,
                    caps: WindowCaps {
                        per_day: Some(10),
                        ..Default::default()
                    },
                    conditions: vec![RuleCondition::new(
                        "channel",
                        super::rules::FieldOp::Eq,
                        json!("email"),
                    )],
                    exceptions: Vec::new(),
                },
            ],
        }
    }
}

struct AdaptiveState {
    current_limit: u32,
    engagement: VecDeque<bool>,
    last_nudge_day: Option<i64>,
}

type ScopeHistory = Arc<Mutex<Vec<DateTime<Utc>>>>;

pub struct RateLimiter {
    config: RateLimiterConfig,
    histories: DashMap<String, ScopeHistory>,
    adaptive: DashMap<Uuid, AdaptiveState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            histories: DashMap::new(),
            adaptive: DashMap::new(),
        }
    }

    /// Decide whether a send may proceed, and record it across every
    /// applicable scope when it may.
    pub fn check_and_record(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        priority: NotificationPriority,
        channel: NotificationChannel,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let hour = now.hour();
        let subject = json!({
            "user_id": user_id,
            "notification_type": notification_type.as_str(),
            "priority": priority.as_str(),
            "channel": channel.as_str(),
            "hour": hour,
        });

        let mut applicable: Vec<&RateLimitRule> = self
            .config
            .rules
            .iter()
            .filter(|rule| matches_all(&rule.conditions, &subject))
            .collect();
        applicable.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        // Acquire every distinct scope lock up front, in sorted key
        // order, so the whole check-then-record sequence is one critical
        // section and concurrent callers cannot deadlock.
        let mut unique_keys: Vec<String> = applicable
            .iter()
            .map(|rule| self.scope_key(rule.scope, user_id, channel, notification_type))
            .collect();
        unique_keys.sort();
        unique_keys.dedup();

        let handles: Vec<(String, ScopeHistory)> = unique_keys
            .into_iter()
            .map(|key| {
                let handle = self
                    .histories
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
                    .clone();
                (key, handle)
            })
            .collect();

        let mut guards: std::collections::HashMap<&str, std::sync::MutexGuard<'_, Vec<DateTime<Utc>>>> =
            handles
                .iter()
                .map(|(key, handle)| {
                    (
                        key.as_str(),
                        handle.lock().expect("rate history lock poisoned"),
                    )
                })
                .collect();

        let prune_cutoff = now - Duration::hours(self.config.history_hours);
        for guard in guards.values_mut() {
            guard.retain(|t| *t >= prune_cutoff);
        }

        let adaptive_limit = self.current_limit(user_id);
        let mut user_hour_quota: Option<Quota> = None;

        for rule in &applicable {
            let key = self.scope_key(rule.scope, user_id, channel, notification_type);
            let Some(guard) = guards.get(key.as_str()) else {
                continue;
            };
            for (window, cap) in rule.caps.iter() {
                // The adaptive limit replaces the hourly cap on user
                // scope; the user's max-per-day preference tightens the
                // daily one
                let cap = if rule.scope == RuleScope::User && window == Duration::hours(1) {
                    adaptive_limit
                } else if rule.scope == RuleScope::User && window == Duration::days(1) {
                    cap.min(profile.notification_preferences.max_per_day)
                } else {
                    cap
                };

                let window_start = now - window;
                let in_window: Vec<&DateTime<Utc>> =
                    guard.iter().filter(|t| **t >= window_start).collect();
                let used = in_window.len() as u32;

                if rule.scope == RuleScope::User && window == Duration::hours(1) {
                    user_hour_quota = Some(Quota {
                        used,
                        limit: cap,
                        resets_at: in_window
                            .first()
                            .map(|t| **t + window)
                            .unwrap_or(now + window),
                    });
                }

                if used >= cap {
                    let bypassed = rule
                        .exceptions
                        .iter()
                        .any(|e| e.matches(priority, notification_type, hour));
                    if bypassed {
                        info!(
                            user_id = %user_id,
                            rule = rule.name.as_str(),
                            "Rate cap bypassed by exception"
                        );
                        continue;
                    }

                    let oldest = in_window.first().map(|t| **t).unwrap_or(now);
                    let retry_after_secs = ((oldest + window) - now).num_seconds().max(1);
                    let suggested_delay_secs =
                        self.suggested_spacing(adaptive_limit, guard.last().copied(), now);

                    debug!(
                        user_id = %user_id,
                        rule = rule.name.as_str(),
                        used = used,
                        cap = cap,
                        "Rate limited"
                    );
                    return RateDecision {
                        allowed: false,
                        reason: Some(format!("rate rule '{}' exhausted", rule.name)),
                        retry_after_secs: Some(retry_after_secs),
                        suggested_delay_secs,
                        quota: Some(Quota {
                            used,
                            limit: cap,
                            resets_at: oldest + window,
                        }),
                    };
                }
            }
        }

        // Allowed: write the record into every applicable scope history
        for guard in guards.values_mut() {
            guard.push(now);
        }

        RateDecision {
            allowed: true,
            reason: None,
            retry_after_secs: None,
            suggested_delay_secs: None,
            quota: user_hour_quota.map(|mut q| {
                q.used += 1;
                q
            }),
        }
    }

    fn scope_key(
        &self,
        scope: RuleScope,
        user_id: Uuid,
        channel: NotificationChannel,
        notification_type: NotificationType,
    ) -> String {
        match scope {
            RuleScope::Global => "global".to_string(),
            RuleScope::User => format!("user:{}", user_id),
            RuleScope::Channel => format!("channel:{}:{}", user_id, channel.as_str()),
            RuleScope::Type => format!("type:{}:{}", user_id, notification_type.as_str()),
        }
    }

    /// Spacing hint derived from the hourly limit: the even interval
    /// minus time already elapsed since the last send
    fn suggested_spacing(
        &self,
        hourly_limit: u32,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let last = last?;
        let interval = 3600 / hourly_limit.max(1) as i64;
        let since_last = (now - last).num_seconds();
        Some((interval - since_last).max(0))
    }

    /// Record whether a delivered notification was opened or clicked.
    /// Engagement collapsing under the threshold halves the limit on the
    /// spot; otherwise a daily nudge drifts it 10% toward the ceiling or
    /// floor.
    pub fn record_engagement(&self, user_id: Uuid, engaged: bool, now: DateTime<Utc>) {
        let mut state = self.adaptive_entry(user_id);
        state.engagement.push_back(engaged);
        while state.engagement.len() > self.config.engagement_window {
            state.engagement.pop_front();
        }

        let ratio = engagement_ratio(&state.engagement);
        if state.engagement.len() >= 5 && ratio < self.config.halve_below {
            let halved = (state.current_limit / 2).max(self.config.adaptive_floor);
            if halved < state.current_limit {
                info!(
                    user_id = %user_id,
                    from = state.current_limit,
                    to = halved,
                    "Adaptive limit halved on poor engagement"
                );
                state.current_limit = halved;
            }
            return;
        }

        // At most one drift per day
        let today = now.date_naive().num_days_from_ce() as i64;
        if state.last_nudge_day == Some(today) {
            return;
        }
        state.last_nudge_day = Some(today);
        let current = state.current_limit as f64;
        state.current_limit = if ratio >= self.config.halve_below {
            ((current * 1.1).round() as u32).min(self.config.adaptive_ceiling)
        } else {
            ((current * 0.9).round() as u32).max(self.config.adaptive_floor)
        };
    }

    pub fn current_limit(&self, user_id: Uuid) -> u32 {
        self.adaptive
            .get(&user_id)
            .map(|s| s.current_limit)
            .unwrap_or(self.config.default_hourly_limit)
    }

    fn adaptive_entry(&self, user_id: Uuid) -> dashmap::mapref::one::RefMut<'_, Uuid, AdaptiveState> {
        self.adaptive.entry(user_id).or_insert_with(|| AdaptiveState {
            current_limit: self.config.default_hourly_limit,
            engagement: VecDeque::new(),
            last_nudge_day: None,
        })
    }

    pub fn erase(&self, user_id: Uuid) {
        self.adaptive.remove(&user_id);
        let prefixes = [
            format!("user:{}", user_id),
            format!("channel:{}:", user_id),
            format!("type:{}:", user_id),
        ];
        self.histories
            .retain(|key, _| !prefixes.iter().any(|p| key.starts_with(p.as_str())));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

fn engagement_ratio(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 1.0;
    }
    window.iter().filter(|&&e| e).count() as f64 / window.len() as f64
}
