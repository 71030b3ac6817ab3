// ============================================
// Engagement Scorer
// ============================================
//
// Scores a (profile, content, context) triple for predicted engagement.
// Seven weighted components, then multiplicative context modifiers:
// repeat-content penalty, diversity bonus, channel affinity factor,
// freshness by age bucket. Weights personalize per user once enough
// notification feedback has accumulated.

use crate::models::{
    ContentItem, EventType, NotificationChannel, ScoreVector, UserProfile,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Send,
    Delay,
    Skip,
}

/// Component weights; always renormalized to sum 1
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub timing: f64,
    pub user_activity: f64,
    pub quality: f64,
    pub social: f64,
    pub sentiment: f64,
    pub novelty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.25,
            timing: 0.20,
            user_activity: 0.15,
            quality: 0.15,
            social: 0.10,
            sentiment: 0.10,
            novelty: 0.05,
        }
    }
}

impl ScoreWeights {
    fn normalize(&mut self) {
        let sum = self.relevance
            + self.timing
            + self.user_activity
            + self.quality
            + self.social
            + self.sentiment
            + self.novelty;
        if sum > 0.0 {
            self.relevance /= sum;
            self.timing /= sum;
            self.user_activity /= sum;
            self.quality /= sum;
            self.social /= sum;
            self.sentiment /= sum;
            self.novelty /= sum;
        }
    }
}

/// Context for one scoring call
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub proposed_time: DateTime<Utc>,
    pub channel: NotificationChannel,
    /// Content ids delivered to the user recently
    pub recent_notification_ids: Vec<Uuid>,
    /// Resolved content of recent deliveries, for similarity penalties
    pub recent_contents: Vec<ContentItem>,
}

/// Scoring result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementScore {
    pub vector: ScoreVector,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Reference ceilings for social-proof normalization
    pub views_ceiling: f64,
    pub likes_ceiling: f64,
    pub shares_ceiling: f64,
    pub comments_ceiling: f64,
    /// Feedback samples needed before weights personalize
    pub min_feedback_samples: usize,
    /// Feedback window kept per user
    pub feedback_window: usize,
    /// Open/click ratio at or under which weights shift conservative
    pub low_engagement_ratio: f64,
    pub send_threshold: f64,
    pub delay_threshold: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            views_ceiling: 10_000.0,
            likes_ceiling: 1_000.0,
            shares_ceiling: 500.0,
            comments_ceiling: 200.0,
            min_feedback_samples: 10,
            feedback_window: 20,
            low_engagement_ratio: 0.5,
            send_threshold: 0.6,
            delay_threshold: 0.4,
        }
    }
}

struct PersonalWeights {
    weights: ScoreWeights,
    feedback: VecDeque<bool>,
}

pub struct EngagementScorer {
    config: ScorerConfig,
    personal: DashMap<Uuid, PersonalWeights>,
}

impl EngagementScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            personal: DashMap::new(),
        }
    }

    /// Record whether the user opened/clicked a delivered notification.
    /// Once enough samples exist and engagement is poor, weights shift
    /// toward relevance and timing and away from novelty and social.
    pub fn record_feedback(&self, user_id: Uuid, engaged: bool) {
        let mut entry = self.personal.entry(user_id).or_insert_with(|| PersonalWeights {
            weights: ScoreWeights::default(),
            feedback: VecDeque::new(),
        });
        entry.feedback.push_back(engaged);
        while entry.feedback.len() > self.config.feedback_window {
            entry.feedback.pop_front();
        }

        if entry.feedback.len() < self.config.min_feedback_samples {
            return;
        }
        let ratio = entry.feedback.iter().filter(|&&e| e).count() as f64
            / entry.feedback.len() as f64;
        if ratio <= self.config.low_engagement_ratio {
            let weights = &mut entry.weights;
            weights.relevance += 0.05;
            weights.timing += 0.03;
            weights.novelty = (weights.novelty - 0.04).max(0.01);
            weights.social = (weights.social - 0.04).max(0.01);
            weights.normalize();
            debug!(user_id = %user_id, open_ratio = ratio, "Scorer weights personalized");
        }
    }

    pub fn weights_for(&self, user_id: Uuid) -> ScoreWeights {
        self.personal
            .get(&user_id)
            .map(|p| p.weights)
            .unwrap_or_default()
    }

    pub fn score(
        &self,
        profile: &UserProfile,
        content: &ContentItem,
        context: &ScoringContext,
    ) -> EngagementScore {
        let weights = self.weights_for(profile.user_id);

        let relevance = self.relevance_component(profile, content);
        let timing = self.timing_component(profile, context.proposed_time);
        let user_activity = self.user_activity_component(profile);
        let quality = content.quality_score.clamp(0.0, 1.0);
        let social = self.social_component(content);
        let sentiment = self.sentiment_component(profile, content);
        let novelty = self.novelty_component(profile, content, context);

        let mut total = weights.relevance * relevance
            + weights.timing * timing
            + weights.user_activity * user_activity
            + weights.quality * quality
            + weights.social * social
            + weights.sentiment * sentiment
            + weights.novelty * novelty;

        let mut reasons = Vec::new();
        let mut suggestions = Vec::new();

        // Repeat-content penalty
        if context.recent_notification_ids.contains(&content.id) {
            total = 0.0;
            reasons.push("content already delivered recently".to_string());
        } else {
            let similarity = self.max_recent_similarity(content, &context.recent_contents);
            if similarity > 0.0 {
                total *= 1.0 - 0.8 * similarity;
                if similarity > 0.5 {
                    reasons.push("similar content delivered recently".to_string());
                }
            }
        }

        // Diversity bonus for a category absent from recent engagement
        let recent_categories: Vec<&str> = profile
            .engagement_history
            .iter()
            .rev()
            .take(10)
            .filter_map(|r| r.category.as_deref())
            .collect();
        if !recent_categories.contains(&content.category.as_str()) {
            total *= 1.10;
            reasons.push("category adds diversity".to_string());
        }

        // Channel affinity
        let affinity = profile.channel_affinity(context.channel);
        total *= 0.7 + 0.3 * affinity;

        // Freshness by age bucket
        let age_hours =
            (context.proposed_time - content.publish_time).num_minutes() as f64 / 60.0;
        let freshness = if age_hours < 1.0 {
            1.2
        } else if age_hours < 6.0 {
            1.1
        } else if age_hours < 24.0 {
            1.05
        } else if age_hours < 72.0 {
            1.0
        } else {
            reasons.push("content is stale".to_string());
            0.9
        };
        total *= freshness;
        let total = total.clamp(0.0, 1.0);

        if relevance > 0.6 {
            reasons.push("strong interest match".to_string());
        }
        if timing > 0.7 {
            reasons.push("user is typically active now".to_string());
        }

        let hour = context.proposed_time.hour();
        let late = !(6..22).contains(&hour);
        let recommendation = if total >= self.config.send_threshold {
            Recommendation::Send
        } else if total >= self.config.delay_threshold {
            if late {
                suggestions.push("delay until morning activity window".to_string());
                Recommendation::Delay
            } else {
                Recommendation::Send
            }
        } else {
            reasons.push("predicted engagement too low".to_string());
            Recommendation::Skip
        };

        EngagementScore {
            vector: ScoreVector {
                relevance,
                timing,
                user_activity,
                quality,
                social,
                sentiment,
                novelty,
                total,
            },
            recommendation,
            reasons,
            suggestions,
        }
    }

    /// relevance = 0.6 * category + 0.25 * mean entity + 0.15 * mean tag
    fn relevance_component(&self, profile: &UserProfile, content: &ContentItem) -> f64 {
        let category = profile.interest(&content.category);
        let entity_mean = mean_interest(profile, &content.entities);
        let tag_mean = mean_interest(profile, &content.tags);
        (0.6 * category + 0.25 * entity_mean + 0.15 * tag_mean).clamp(0.0, 1.0)
    }

    /// timing = 0.7 * hour activity (x1.3 on peaks) + 0.3 * day activity,
    /// forced down to a tenth inside quiet hours
    fn timing_component(&self, profile: &UserProfile, proposed: DateTime<Utc>) -> f64 {
        let hour = proposed.hour();
        let day = proposed.weekday().num_days_from_monday() as usize;

        let patterns = &profile.reading_patterns;
        let hour_max = patterns
            .hourly_activity
            .iter()
            .fold(0.0_f64, |a, &b| a.max(b));
        let day_max = patterns
            .daily_activity
            .iter()
            .fold(0.0_f64, |a, &b| a.max(b));

        // Thin profiles fall back to a neutral middle
        let mut hour_score = if hour_max > 0.0 {
            patterns.hourly_activity[hour as usize] / hour_max
        } else {
            0.5
        };
        let day_score = if day_max > 0.0 {
            patterns.daily_activity[day] / day_max
        } else {
            0.5
        };

        if profile.is_peak_hour(hour) {
            hour_score = (hour_score * 1.3).min(1.0);
        }

        let mut timing = 0.7 * hour_score + 0.3 * day_score;
        if profile.is_quiet_hour(hour) {
            timing *= 0.1;
        }
        timing.clamp(0.0, 1.0)
    }

    fn user_activity_component(&self, profile: &UserProfile) -> f64 {
        let history = &profile.engagement_history;
        if history.is_empty() {
            return 0.3;
        }
        let volume = (history.len() as f64 / 100.0).min(1.0);
        let deep = history
            .iter()
            .filter(|r| r.event_type.is_deep_engagement())
            .count() as f64
            / history.len() as f64;
        (0.5 * volume + 0.5 * deep).clamp(0.0, 1.0)
    }

    /// Social proof, each metric capped at its reference ceiling
    fn social_component(&self, content: &ContentItem) -> f64 {
        let engagement = &content.engagement;
        let views = (engagement.views as f64 / self.config.views_ceiling).min(1.0);
        let likes = (engagement.likes as f64 / self.config.likes_ceiling).min(1.0);
        let shares = (engagement.shares as f64 / self.config.shares_ceiling).min(1.0);
        let comments = (engagement.comments as f64 / self.config.comments_ceiling).min(1.0);
        0.2 * views + 0.3 * likes + 0.3 * shares + 0.2 * comments
    }

    fn sentiment_component(&self, profile: &UserProfile, content: &ContentItem) -> f64 {
        let preference = if content.sentiment_score > 0.3 {
            profile.sentiment_preferences.positive
        } else if content.sentiment_score < -0.3 {
            profile.sentiment_preferences.negative
        } else {
            profile.sentiment_preferences.neutral
        };
        (preference + 0.2 * content.sentiment_score.abs()).min(1.0)
    }

    fn novelty_component(
        &self,
        profile: &UserProfile,
        content: &ContentItem,
        context: &ScoringContext,
    ) -> f64 {
        let familiarity = profile.interest(&content.category).clamp(0.0, 1.0);
        let mut novelty = 1.0 - familiarity;

        if novelty > 0.7 {
            if content.quality_score > 0.8 {
                novelty *= 1.2;
            } else if content.quality_score < 0.5 {
                novelty *= 0.7;
            }
        }

        let similarity = self.max_recent_similarity(content, &context.recent_contents);
        novelty *= 1.0 - 0.5 * similarity;
        novelty.clamp(0.0, 1.0)
    }

    /// Highest tag/entity overlap against recently delivered content
    fn max_recent_similarity(&self, content: &ContentItem, recent: &[ContentItem]) -> f64 {
        recent
            .iter()
            .filter(|r| r.id != content.id)
            .map(|r| content_similarity(content, r))
            .fold(0.0, f64::max)
    }
}

impl Default for EngagementScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

/// Jaccard overlap over category + tags + entities of two content items
fn content_similarity(a: &ContentItem, b: &ContentItem) -> f64 {
    let features = |c: &ContentItem| -> std::collections::HashSet<String> {
        let mut set: std::collections::HashSet<String> = c
            .tags
            .iter()
            .chain(c.entities.iter())
            .map(|s| s.to_lowercase())
            .collect();
        set.insert(c.category.to_lowercase());
        set
    };
    let set_a = features(a);
    let set_b = features(b);
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn mean_interest(profile: &UserProfile, names: &[String]) -> f64 {
    if names.is_empty() {
        return 0.0;
    }
    names.iter().map(|n| profile.interest(n)).sum::<f64>() / names.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentEngagement, EngagementRecord};
    use chrono::{Duration, TimeZone};

    fn content_at(category: &str, published: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            title: format!("{} update", category),
            category: category.to_string(),
            entities: Vec::new(),
            tags: Vec::new(),
            sentiment_score: 0.4,
            quality_score: 0.7,
            publish_time: published,
            author: "desk".to_string(),
            engagement: ContentEngagement {
                views: 5000,
                likes: 400,
                shares: 100,
                comments: 50,
                completion_rate: 0.6,
                avg_time_spent_secs: 90.0,
                urgency_score: 0.2,
            },
        }
    }

    fn engaged_profile(user_id: Uuid, category: &str) -> UserProfile {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let mut profile = UserProfile::new(user_id, now);
        profile.interests.insert(category.to_string(), 0.8);
        profile.interests.insert("other".to_string(), 0.2);

        let mut hourly = [0.02; 24];
        hourly[9] = 0.4;
        hourly[13] = 0.3;
        hourly[19] = 0.3;
        profile.reading_patterns.hourly_activity = hourly;
        profile.reading_patterns.daily_activity = [1.0 / 7.0; 7];
        profile.reading_patterns.peak_hours = vec![9, 13, 19];
        profile.reading_patterns.quiet_hours = vec![22, 23, 0, 1, 2, 3, 4, 5];

        for i in 0..60 {
            profile.record_engagement(EngagementRecord {
                event_type: if i % 2 == 0 {
                    EventType::ReadComplete
                } else {
                    EventType::PageView
                },
                content_id: None,
                category: Some("other".to_string()),
                timestamp: now - Duration::hours(i),
            });
        }
        profile
    }

    fn context_at(proposed: DateTime<Utc>) -> ScoringContext {
        ScoringContext {
            proposed_time: proposed,
            channel: NotificationChannel::Push,
            recent_notification_ids: Vec::new(),
            recent_contents: Vec::new(),
        }
    }

    #[test]
    fn test_peak_hour_high_interest_sends() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let profile = engaged_profile(user_id, "technology");
        let proposed = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let content = content_at("technology", proposed - Duration::minutes(30));

        let score = scorer.score(&profile, &content, &context_at(proposed));
        assert_eq!(score.recommendation, Recommendation::Send);
        assert!(
            score.vector.timing > 0.8,
            "timing was {}",
            score.vector.timing
        );
    }

    #[test]
    fn test_total_always_in_unit_interval() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let profile = engaged_profile(user_id, "technology");
        let proposed = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        // Viral, brand-new content with every bonus active
        let mut content = content_at("technology", proposed);
        content.engagement.views = 1_000_000;
        content.engagement.likes = 100_000;
        content.engagement.shares = 50_000;
        content.engagement.comments = 20_000;
        content.quality_score = 1.0;

        let score = scorer.score(&profile, &content, &context_at(proposed));
        assert!((0.0..=1.0).contains(&score.vector.total));

        // Bare profile, stale content
        let bare = UserProfile::new(Uuid::new_v4(), proposed);
        let old = content_at("unknown", proposed - Duration::days(30));
        let score = scorer.score(&bare, &old, &context_at(proposed));
        assert!((0.0..=1.0).contains(&score.vector.total));
    }

    #[test]
    fn test_repeat_content_zeroes_score() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let profile = engaged_profile(user_id, "technology");
        let proposed = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let content = content_at("technology", proposed);

        let mut context = context_at(proposed);
        context.recent_notification_ids = vec![content.id];

        let score = scorer.score(&profile, &content, &context);
        assert_eq!(score.vector.total, 0.0);
        assert_eq!(score.recommendation, Recommendation::Skip);
        assert!(score
            .reasons
            .iter()
            .any(|r| r.contains("already delivered")));
    }

    #[test]
    fn test_quiet_hour_suppresses_timing() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let profile = engaged_profile(user_id, "technology");

        let peak = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let quiet = Utc.with_ymd_and_hms(2024, 3, 4, 23, 0, 0).unwrap();
        let content = content_at("technology", peak);

        let peak_score = scorer.score(&profile, &content, &context_at(peak));
        let quiet_score = scorer.score(&profile, &content, &context_at(quiet));
        assert!(quiet_score.vector.timing < peak_score.vector.timing * 0.3);
    }

    #[test]
    fn test_midrange_score_delays_late_at_night() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let mut profile = engaged_profile(user_id, "technology");
        // Remove quiet hours so timing is not crushed, keep moderate interest
        profile.reading_patterns.quiet_hours.clear();
        profile.interests.insert("technology".to_string(), 0.35);

        let late = Utc.with_ymd_and_hms(2024, 3, 4, 23, 0, 0).unwrap();
        let content = content_at("technology", late - Duration::hours(2));
        let score = scorer.score(&profile, &content, &context_at(late));

        if (0.4..0.6).contains(&score.vector.total) {
            assert_eq!(score.recommendation, Recommendation::Delay);
        }
    }

    #[test]
    fn test_feedback_personalizes_weights() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();

        // 10 samples, all ignored: open ratio 0 <= 0.5
        for _ in 0..10 {
            scorer.record_feedback(user_id, false);
        }

        let personalized = scorer.weights_for(user_id);
        let defaults = ScoreWeights::default();
        assert!(personalized.relevance > defaults.relevance);
        assert!(personalized.novelty < defaults.novelty);
        assert!(personalized.social < defaults.social);

        let sum = personalized.relevance
            + personalized.timing
            + personalized.user_activity
            + personalized.quality
            + personalized.social
            + personalized.sentiment
            + personalized.novelty;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_few_feedback_samples_keep_defaults() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            scorer.record_feedback(user_id, false);
        }
        let weights = scorer.weights_for(user_id);
        let defaults = ScoreWeights::default();
        assert!((weights.relevance - defaults.relevance).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_penalty_reduces_score() {
        let scorer = EngagementScorer::default();
        let user_id = Uuid::new_v4();
        let profile = engaged_profile(user_id, "technology");
        let proposed = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        let mut content = content_at("technology", proposed);
        content.tags = vec!["ai".to_string(), "chips".to_string()];

        let mut near_duplicate = content_at("technology", proposed - Duration::hours(1));
        near_duplicate.tags = vec!["ai".to_string(), "chips".to_string()];

        let clean = scorer.score(&profile, &content, &context_at(proposed));
        let mut context = context_at(proposed);
        context.recent_contents = vec![near_duplicate];
        let penalized = scorer.score(&profile, &content, &context);

        assert!(penalized.vector.total < clean.vector.total);
    }
}
