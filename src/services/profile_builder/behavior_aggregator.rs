// ============================================
// Behavior Pattern Aggregator
// ============================================
//
// Clusters a user's longer-term event history into named behavioral
// patterns, a churn-risk estimate, and an engagement trend. Needs a
// minimum history to be reliable; below that it degrades to defaults
// and says so via the `reliable` flag.

use crate::models::{BehaviorEvent, EventType};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryPattern {
    PowerUser,
    RegularUser,
    CasualUser,
    DormantUser,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubPattern {
    FocusedReader,
    ContentExplorer,
    SocialSharer,
    NightOwl,
    EarlyBird,
    WeekendWarrior,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// A matched sub-pattern with its confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern: SubPattern,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLevel {
    pub events_per_day: f64,
    pub sessions_per_day: f64,
}

/// Aggregated long-term behavior view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorSummary {
    pub user_id: Uuid,
    pub activity: ActivityLevel,
    pub primary_pattern: PrimaryPattern,
    pub sub_patterns: Vec<DetectedPattern>,
    /// Churn risk in [0, 1]
    pub churn_risk: f64,
    pub trend: EngagementTrend,
    /// False when computed from fewer than the configured minimum events
    pub reliable: bool,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BehaviorAggregatorConfig {
    /// Minimum events for a reliable classification
    pub min_events: usize,
    pub power_user_events_per_day: f64,
    pub power_user_sessions_per_day: f64,
    pub regular_user_events_per_day: f64,
    pub casual_user_events_per_day: f64,
    /// Ratio thresholds for sub-patterns
    pub focused_reader_completion_ratio: f64,
    pub content_explorer_distinct_ratio: f64,
    pub social_sharer_ratio: f64,
    pub night_owl_ratio: f64,
    pub early_bird_ratio: f64,
    pub weekend_ratio: f64,
    /// Relative change counted as a directional trend
    pub trend_band: f64,
}

impl Default for BehaviorAggregatorConfig {
    fn default() -> Self {
        Self {
            min_events: 50,
            power_user_events_per_day: 50.0,
            power_user_sessions_per_day: 5.0,
            regular_user_events_per_day: 10.0,
            casual_user_events_per_day: 1.0,
            focused_reader_completion_ratio: 0.6,
            content_explorer_distinct_ratio: 0.3,
            social_sharer_ratio: 0.15,
            night_owl_ratio: 0.4,
            early_bird_ratio: 0.4,
            weekend_ratio: 0.5,
            trend_band: 0.2,
        }
    }
}

pub struct BehaviorAggregator {
    config: BehaviorAggregatorConfig,
}

impl BehaviorAggregator {
    pub fn new(config: BehaviorAggregatorConfig) -> Self {
        Self { config }
    }

    /// Aggregate a user's event history, oldest first.
    pub fn aggregate(
        &self,
        user_id: Uuid,
        events: &[BehaviorEvent],
        now: DateTime<Utc>,
    ) -> BehaviorSummary {
        if events.len() < self.config.min_events {
            debug!(
                user_id = %user_id,
                event_count = events.len(),
                "Insufficient history, returning default behavior summary"
            );
            return BehaviorSummary {
                user_id,
                activity: ActivityLevel {
                    events_per_day: 0.0,
                    sessions_per_day: 0.0,
                },
                primary_pattern: PrimaryPattern::CasualUser,
                sub_patterns: Vec::new(),
                churn_risk: 0.5,
                trend: EngagementTrend::Stable,
                reliable: false,
                computed_at: now,
            };
        }

        let activity = self.activity_level(events);
        let primary_pattern = self.classify_primary(&activity);
        let sub_patterns = self.detect_sub_patterns(events);
        let churn_risk = self.churn_risk(events, &activity, now);
        let trend = self.engagement_trend(events);

        BehaviorSummary {
            user_id,
            activity,
            primary_pattern,
            sub_patterns,
            churn_risk,
            trend,
            reliable: true,
            computed_at: now,
        }
    }

    fn activity_level(&self, events: &[BehaviorEvent]) -> ActivityLevel {
        let span_days = ((events[events.len() - 1].timestamp - events[0].timestamp).num_hours()
            as f64
            / 24.0)
            .max(1.0);
        let sessions: HashSet<&str> = events.iter().map(|e| e.session_id.as_str()).collect();
        ActivityLevel {
            events_per_day: events.len() as f64 / span_days,
            sessions_per_day: sessions.len() as f64 / span_days,
        }
    }

    fn classify_primary(&self, activity: &ActivityLevel) -> PrimaryPattern {
        if activity.events_per_day >= self.config.power_user_events_per_day
            || activity.sessions_per_day >= self.config.power_user_sessions_per_day
        {
            PrimaryPattern::PowerUser
        } else if activity.events_per_day >= self.config.regular_user_events_per_day {
            PrimaryPattern::RegularUser
        } else if activity.events_per_day >= self.config.casual_user_events_per_day {
            PrimaryPattern::CasualUser
        } else {
            PrimaryPattern::DormantUser
        }
    }

    fn detect_sub_patterns(&self, events: &[BehaviorEvent]) -> Vec<DetectedPattern> {
        let total = events.len() as f64;
        let mut patterns = Vec::new();

        // Reading behavior: completions relative to starts
        let starts = events
            .iter()
            .filter(|e| e.event_type == EventType::ReadStart)
            .count();
        let completions = events
            .iter()
            .filter(|e| e.event_type == EventType::ReadComplete)
            .count();
        if starts > 0 {
            let ratio = completions as f64 / starts as f64;
            if ratio >= self.config.focused_reader_completion_ratio {
                patterns.push(DetectedPattern {
                    pattern: SubPattern::FocusedReader,
                    confidence: ratio.min(1.0),
                });
            }
        }

        // Breadth of content touched
        let distinct: HashSet<Uuid> = events.iter().filter_map(|e| e.content_id).collect();
        let distinct_ratio = distinct.len() as f64 / total;
        if distinct_ratio >= self.config.content_explorer_distinct_ratio {
            patterns.push(DetectedPattern {
                pattern: SubPattern::ContentExplorer,
                confidence: (distinct_ratio / (2.0 * self.config.content_explorer_distinct_ratio))
                    .min(1.0),
            });
        }

        // Social behavior
        let social = events.iter().filter(|e| e.event_type.is_social()).count() as f64;
        let social_ratio = social / total;
        if social_ratio >= self.config.social_sharer_ratio {
            patterns.push(DetectedPattern {
                pattern: SubPattern::SocialSharer,
                confidence: (social_ratio / (2.0 * self.config.social_sharer_ratio)).min(1.0),
            });
        }

        // Temporal behavior
        let night = events
            .iter()
            .filter(|e| {
                let hour = e.timestamp.hour();
                hour >= 22 || hour < 5
            })
            .count() as f64;
        let night_ratio = night / total;
        if night_ratio >= self.config.night_owl_ratio {
            patterns.push(DetectedPattern {
                pattern: SubPattern::NightOwl,
                confidence: night_ratio.min(1.0),
            });
        }

        let early = events
            .iter()
            .filter(|e| (5..9).contains(&e.timestamp.hour()))
            .count() as f64;
        let early_ratio = early / total;
        if early_ratio >= self.config.early_bird_ratio {
            patterns.push(DetectedPattern {
                pattern: SubPattern::EarlyBird,
                confidence: early_ratio.min(1.0),
            });
        }

        let weekend = events
            .iter()
            .filter(|e| {
                matches!(
                    e.timestamp.weekday(),
                    chrono::Weekday::Sat | chrono::Weekday::Sun
                )
            })
            .count() as f64;
        let weekend_ratio = weekend / total;
        if weekend_ratio >= self.config.weekend_ratio {
            patterns.push(DetectedPattern {
                pattern: SubPattern::WeekendWarrior,
                confidence: weekend_ratio.min(1.0),
            });
        }

        patterns
    }

    /// Churn risk from recency, frequency, and engagement depth
    fn churn_risk(
        &self,
        events: &[BehaviorEvent],
        activity: &ActivityLevel,
        now: DateTime<Utc>,
    ) -> f64 {
        let days_since_last =
            (now - events[events.len() - 1].timestamp).num_hours() as f64 / 24.0;
        let recency_risk = (days_since_last / 30.0).clamp(0.0, 1.0);

        let frequency_risk = 1.0 - (activity.events_per_day / 10.0).clamp(0.0, 1.0);

        let deep = events
            .iter()
            .filter(|e| e.event_type.is_deep_engagement())
            .count() as f64;
        let engagement_risk = 1.0 - (deep / events.len() as f64).clamp(0.0, 1.0);

        (0.4 * recency_risk + 0.3 * frequency_risk + 0.3 * engagement_risk).clamp(0.0, 1.0)
    }

    /// Compare deep-engagement ratio between history halves
    fn engagement_trend(&self, events: &[BehaviorEvent]) -> EngagementTrend {
        let mid = events.len() / 2;
        let (first, second) = events.split_at(mid);

        let ratio = |slice: &[BehaviorEvent]| -> f64 {
            if slice.is_empty() {
                return 0.0;
            }
            slice
                .iter()
                .filter(|e| e.event_type.is_deep_engagement())
                .count() as f64
                / slice.len() as f64
        };

        let before = ratio(first);
        let after = ratio(second);
        if before == 0.0 {
            return if after > 0.0 {
                EngagementTrend::Increasing
            } else {
                EngagementTrend::Stable
            };
        }

        let change = (after - before) / before;
        if change > self.config.trend_band {
            EngagementTrend::Increasing
        } else if change < -self.config.trend_band {
            EngagementTrend::Decreasing
        } else {
            EngagementTrend::Stable
        }
    }
}

impl Default for BehaviorAggregator {
    fn default() -> Self {
        Self::new(BehaviorAggregatorConfig::default())
    }
}
