// ============================================
// Timing Predictor
// ============================================
//
// Chooses the best delivery slot among the next 24 hours. Builds a
// 24-slot score vector from the user's hourly activity shape, applies
// peak/device/category boosts, zeroes quiet hours, handles urgency and
// notification spacing, and dampens culturally quiet windows.

use crate::models::{ContentItem, UserProfile};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone)]
pub struct TimingContext {
    pub now: DateTime<Utc>,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub primary_device: Option<DeviceKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingPrediction {
    pub optimal_time: DateTime<Utc>,
    pub confidence: f64,
    pub alternatives: Vec<DateTime<Utc>>,
    pub reasons: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub peak_boost: f64,
    pub mobile_boost: f64,
    pub desktop_boost: f64,
    pub evening_category_boost: f64,
    pub morning_category_boost: f64,
    /// Urgency above this boosts the next three hours
    pub urgency_threshold: f64,
    /// Spacing window after the previous notification
    pub spacing_minutes: i64,
    pub spacing_penalty: f64,
    /// Recurring daily low-attention hours
    pub daily_dampen_hours: Vec<u32>,
    pub daily_dampen: f64,
    /// Weekly midday dampening window
    pub weekly_dampen_day: Weekday,
    pub weekly_dampen_hours: (u32, u32),
    pub weekly_dampen: f64,
    /// Minimum slot score to qualify as a candidate
    pub candidate_threshold: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            peak_boost: 1.5,
            mobile_boost: 1.2,
            desktop_boost: 1.1,
            evening_category_boost: 1.3,
            morning_category_boost: 1.2,
            urgency_threshold: 0.7,
            spacing_minutes: 30,
            spacing_penalty: 0.3,
            daily_dampen_hours: vec![2, 3, 4],
            daily_dampen: 0.7,
            weekly_dampen_day: Weekday::Fri,
            weekly_dampen_hours: (12, 14),
            weekly_dampen: 0.5,
            candidate_threshold: 0.2,
        }
    }
}

pub struct TimingPredictor {
    config: TimingConfig,
}

impl TimingPredictor {
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    pub fn predict(
        &self,
        profile: &UserProfile,
        content: &ContentItem,
        context: &TimingContext,
    ) -> TimingPrediction {
        let mut reasons = Vec::new();
        let mut risks = Vec::new();

        let base = truncate_to_hour(context.now);
        let spacing_active = context
            .last_notification_at
            .map(|at| context.now - at < Duration::minutes(self.config.spacing_minutes))
            .unwrap_or(false);
        if spacing_active {
            risks.push("previous notification was moments ago".to_string());
        }

        // Score each of the next 24 hourly slots
        let mut slots: Vec<(DateTime<Utc>, f64)> = (0..24)
            .map(|i| {
                let slot = base + Duration::hours(i as i64 + 1);
                let score =
                    self.slot_score(profile, content, context, slot, i, spacing_active);
                (slot, score)
            })
            .collect();
        let unfiltered = slots.clone();

        slots.retain(|(_, score)| *score > self.config.candidate_threshold);
        slots.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (optimal_time, alternatives) = if let Some((top, _)) = slots.first().copied() {
            let alternatives = slots.iter().skip(1).take(3).map(|(t, _)| *t).collect();
            (top, alternatives)
        } else {
            // Nothing cleared the threshold; fall back to the best raw slot
            risks.push("no slot cleared the activity threshold".to_string());
            let best = unfiltered
                .iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(t, _)| *t)
                .unwrap_or(base + Duration::hours(1));
            (best, Vec::new())
        };

        let optimal_hour = optimal_time.hour();
        if profile.is_peak_hour(optimal_hour) {
            reasons.push(format!("aligned with peak hour {}", optimal_hour));
        }
        if content.engagement.urgency_score > self.config.urgency_threshold {
            reasons.push("urgent content favors the next hours".to_string());
        }

        let confidence = self.confidence(profile, optimal_hour);
        if profile.engagement_history.len() <= 50 {
            risks.push("short engagement history".to_string());
        }

        debug!(
            user_id = %profile.user_id,
            optimal = %optimal_time,
            confidence = confidence,
            "Timing predicted"
        );

        TimingPrediction {
            optimal_time,
            confidence,
            alternatives,
            reasons,
            risks,
        }
    }

    fn slot_score(
        &self,
        profile: &UserProfile,
        content: &ContentItem,
        context: &TimingContext,
        slot: DateTime<Utc>,
        slot_index: usize,
        spacing_active: bool,
    ) -> f64 {
        let hour = slot.hour();
        let patterns = &profile.reading_patterns;

        let hour_max = patterns
            .hourly_activity
            .iter()
            .fold(0.0_f64, |a, &b| a.max(b));
        let mut score = if hour_max > 0.0 {
            patterns.hourly_activity[hour as usize] / hour_max
        } else {
            0.5
        };

        if profile.is_peak_hour(hour) {
            score = (score * self.config.peak_boost).min(1.0);
        }

        match context.primary_device {
            Some(DeviceKind::Mobile) => {
                if (7..10).contains(&hour) || (18..23).contains(&hour) {
                    score *= self.config.mobile_boost;
                }
            }
            Some(DeviceKind::Desktop) => {
                if (9..17).contains(&hour) {
                    score *= self.config.desktop_boost;
                }
            }
            None => {}
        }

        if profile.is_quiet_hour(hour) {
            return 0.0;
        }

        match content.category.as_str() {
            "entertainment" | "sports" => {
                if (18..23).contains(&hour) {
                    score *= self.config.evening_category_boost;
                }
            }
            "education" | "science" => {
                if (6..12).contains(&hour) {
                    score *= self.config.morning_category_boost;
                }
            }
            _ => {}
        }

        let urgency = content.engagement.urgency_score;
        if urgency > self.config.urgency_threshold && slot_index < 3 {
            score *= 1.0 + urgency;
        }

        if spacing_active && slot_index < 2 {
            score *= self.config.spacing_penalty;
        }

        if self.config.daily_dampen_hours.contains(&hour) {
            score *= self.config.daily_dampen;
        }
        let (weekly_start, weekly_end) = self.config.weekly_dampen_hours;
        if slot.weekday() == self.config.weekly_dampen_day
            && (weekly_start..weekly_end).contains(&hour)
        {
            score *= self.config.weekly_dampen;
        }

        score
    }

    fn confidence(&self, profile: &UserProfile, optimal_hour: u32) -> f64 {
        let mut confidence = 0.5;
        let history = profile.engagement_history.len();
        if history > 100 {
            confidence += 0.2;
        } else if history > 50 {
            confidence += 0.1;
        }
        confidence += 0.2 * profile.reading_patterns.consistency.clamp(0.0, 1.0);
        if profile.is_peak_hour(optimal_hour) {
            confidence += 0.1;
        }
        confidence.min(0.95)
    }
}

impl Default for TimingPredictor {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
