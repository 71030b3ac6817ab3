// ============================================
// Interest Profile Builder
// ============================================
//
// Folds session and pattern signals into a decaying, normalized interest
// profile:
//
// weight mix = 0.6 * content-derived + 0.3 * social-derived + 0.1 * peak-hour
// per-item content weight = 1 + quality * 0.3 + engagement bonus
// social action weights: comment > share > bookmark > like > read > click
//
// Each rebuild decays existing weights, folds in fresh contributions,
// drops entries under the floor, and renormalizes to sum 1. Also derives
// the hourly/daily activity shape, peak/quiet hours, reading consistency,
// sentiment distribution, and per-category evolution labels.

use crate::models::{
    BehaviorEvent, ContentItem, EventType, InterestEvolution, NotificationChannel,
    SentimentPreferences, UserProfile,
};
use crate::services::realtime::ReadingSession;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InterestBuilderConfig {
    pub content_weight: f64,
    pub social_weight: f64,
    pub peak_hour_weight: f64,
    /// Decay applied to existing weights per recompute cycle
    pub decay_factor: f64,
    /// Normalized weights under this floor are dropped
    pub weight_floor: f64,
    /// Quality contribution to the per-item weight
    pub quality_factor: f64,
    /// Rollup shares for entities and tags relative to category
    pub entity_rollup: f64,
    pub tag_rollup: f64,
    /// Hour buckets above this multiple of the mean are peaks
    pub peak_multiple: f64,
    /// Hour buckets below this multiple of the mean are quiet candidates
    pub quiet_multiple: f64,
    /// Minimum contiguous run length for a quiet interval
    pub quiet_min_run: usize,
    /// Weekly windows used for evolution analysis
    pub evolution_weeks: i64,
}

impl Default for InterestBuilderConfig {
    fn default() -> Self {
        Self {
            content_weight: 0.6,
            social_weight: 0.3,
            peak_hour_weight: 0.1,
            decay_factor: 0.95,
            weight_floor: 0.1,
            quality_factor: 0.3,
            entity_rollup: 0.5,
            tag_rollup: 0.3,
            peak_multiple: 1.2,
            quiet_multiple: 0.3,
            quiet_min_run: 2,
            evolution_weeks: 4,
        }
    }
}

pub struct InterestProfileBuilder {
    config: InterestBuilderConfig,
}

impl InterestProfileBuilder {
    pub fn new(config: InterestBuilderConfig) -> Self {
        Self { config }
    }

    /// Recompute the learned parts of a profile from the event history.
    /// `contents` resolves the content ids referenced by events;
    /// `sessions` carries per-content reading summaries where available.
    pub fn rebuild(
        &self,
        profile: &mut UserProfile,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
        sessions: &[ReadingSession],
        now: DateTime<Utc>,
    ) {
        self.rebuild_activity_shape(profile, events, sessions);

        let content_interests = self.content_contributions(events, contents);
        let social_interests = self.social_contributions(events, contents);
        let peak_interests =
            self.peak_hour_contributions(events, contents, &profile.reading_patterns.peak_hours);

        let mut fresh: HashMap<String, f64> = HashMap::new();
        accumulate(&mut fresh, normalized(content_interests), self.config.content_weight);
        accumulate(&mut fresh, normalized(social_interests), self.config.social_weight);
        accumulate(&mut fresh, normalized(peak_interests), self.config.peak_hour_weight);

        self.merge_interests(profile, fresh);
        self.rebuild_sentiment_preferences(profile, events, contents);
        profile.interest_evolution = self.evolution_labels(events, contents, now);
        profile.updated_at = now;

        debug!(
            user_id = %profile.user_id,
            interest_count = profile.interests.len(),
            peak_hours = ?profile.reading_patterns.peak_hours,
            "Profile rebuilt"
        );
    }

    /// Content-derived interests: per engaged item,
    /// weight = 1 + quality * 0.3 + engagement bonus
    fn content_contributions(
        &self,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
    ) -> HashMap<String, f64> {
        let mut weights = HashMap::new();
        let mut seen = std::collections::HashSet::new();

        for event in events {
            if !matches!(
                event.event_type,
                EventType::ReadStart
                    | EventType::ReadProgress
                    | EventType::ReadComplete
                    | EventType::PageView
            ) {
                continue;
            }
            let Some(content_id) = event.content_id else {
                continue;
            };
            if !seen.insert(content_id) {
                continue;
            }
            let Some(content) = contents.get(&content_id) else {
                continue;
            };

            let popularity = ((content.engagement.likes
                + 2 * content.engagement.shares
                + 3 * content.engagement.comments) as f64
                / 1000.0)
                .min(1.0);
            let item_weight =
                1.0 + content.quality_score * self.config.quality_factor + 0.5 * popularity;
            self.rollup(&mut weights, content, item_weight);
        }
        weights
    }

    /// Social-derived interests, weighted by action type
    fn social_contributions(
        &self,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
    ) -> HashMap<String, f64> {
        let mut weights = HashMap::new();
        for event in events {
            let action_weight = social_action_weight(event.event_type);
            if action_weight <= 0.0 {
                continue;
            }
            let Some(content) = event.content_id.and_then(|id| contents.get(&id)) else {
                continue;
            };
            self.rollup(&mut weights, content, action_weight);
        }
        weights
    }

    /// Bonus for interests engaged during the user's peak hours
    fn peak_hour_contributions(
        &self,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
        peak_hours: &[u32],
    ) -> HashMap<String, f64> {
        let mut weights = HashMap::new();
        for event in events {
            if !peak_hours.contains(&event.timestamp.hour()) {
                continue;
            }
            let Some(content) = event.content_id.and_then(|id| contents.get(&id)) else {
                continue;
            };
            *weights.entry(content.category.clone()).or_insert(0.0) += 1.0;
        }
        weights
    }

    fn rollup(&self, weights: &mut HashMap<String, f64>, content: &ContentItem, weight: f64) {
        *weights.entry(content.category.clone()).or_insert(0.0) += weight;
        for entity in &content.entities {
            *weights.entry(entity.clone()).or_insert(0.0) += weight * self.config.entity_rollup;
        }
        for tag in &content.tags {
            *weights.entry(tag.clone()).or_insert(0.0) += weight * self.config.tag_rollup;
        }
    }

    /// Decay existing weights, fold in fresh mass, apply the floor,
    /// renormalize to sum 1.
    fn merge_interests(&self, profile: &mut UserProfile, fresh: HashMap<String, f64>) {
        let mut merged: HashMap<String, f64> = profile
            .interests
            .iter()
            .map(|(k, v)| (k.clone(), v * self.config.decay_factor))
            .collect();
        for (name, weight) in fresh {
            *merged.entry(name).or_insert(0.0) += weight;
        }

        normalize_in_place(&mut merged);
        let before_floor = merged.clone();
        merged.retain(|_, w| *w >= self.config.weight_floor);

        if merged.is_empty() {
            // Keep the strongest signal rather than forgetting everything
            if let Some((name, weight)) = before_floor
                .into_iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            {
                if weight > 0.0 {
                    merged.insert(name, weight);
                }
            }
        }
        normalize_in_place(&mut merged);
        profile.interests = merged;
    }

    fn rebuild_activity_shape(
        &self,
        profile: &mut UserProfile,
        events: &[BehaviorEvent],
        sessions: &[ReadingSession],
    ) {
        if events.is_empty() {
            return;
        }

        let mut hourly = [0.0_f64; 24];
        let mut daily = [0.0_f64; 7];
        for event in events {
            hourly[event.timestamp.hour() as usize] += 1.0;
            daily[event.timestamp.weekday().num_days_from_monday() as usize] += 1.0;
        }
        let total = events.len() as f64;
        for slot in hourly.iter_mut() {
            *slot /= total;
        }
        for slot in daily.iter_mut() {
            *slot /= total;
        }

        let mean = hourly.iter().sum::<f64>() / 24.0;
        let peak_hours: Vec<u32> = (0..24)
            .filter(|&h| hourly[h as usize] > self.config.peak_multiple * mean)
            .collect();
        let quiet_hours = self.quiet_hours(&hourly, mean);

        let variance =
            hourly.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 24.0;
        let consistency = if mean > 0.0 {
            (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Session duration from event spans per session id
        let mut spans: HashMap<&str, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        for event in events {
            spans
                .entry(event.session_id.as_str())
                .and_modify(|(start, end)| {
                    if event.timestamp < *start {
                        *start = event.timestamp;
                    }
                    if event.timestamp > *end {
                        *end = event.timestamp;
                    }
                })
                .or_insert((event.timestamp, event.timestamp));
        }
        let avg_session_duration_secs = spans
            .values()
            .map(|(start, end)| (*end - *start).num_seconds() as f64)
            .sum::<f64>()
            / spans.len() as f64;

        let patterns = &mut profile.reading_patterns;
        patterns.hourly_activity = hourly;
        patterns.daily_activity = daily;
        patterns.peak_hours = peak_hours;
        patterns.quiet_hours = quiet_hours;
        patterns.consistency = consistency;
        patterns.avg_session_duration_secs = avg_session_duration_secs;

        if !sessions.is_empty() {
            patterns.avg_reading_speed_wpm = sessions
                .iter()
                .map(|s| s.reading_speed_wpm)
                .sum::<f64>()
                / sessions.len() as f64;
            patterns.avg_completion_rate = sessions
                .iter()
                .map(|s| s.completion_rate)
                .sum::<f64>()
                / sessions.len() as f64;
        }
    }

    /// Contiguous (wrapping) runs of low-activity hours
    fn quiet_hours(&self, hourly: &[f64; 24], mean: f64) -> Vec<u32> {
        let threshold = self.config.quiet_multiple * mean;
        let low: Vec<bool> = hourly.iter().map(|&v| v < threshold).collect();
        if low.iter().all(|&b| b) {
            return (0..24).collect();
        }

        // Walk the circle starting just past an active hour so wrapping
        // runs are never split
        let start = low.iter().position(|&b| !b).unwrap_or(0);
        let mut quiet = Vec::new();
        let mut run: Vec<u32> = Vec::new();
        for offset in 1..=24 {
            let hour = (start + offset) % 24;
            if low[hour] {
                run.push(hour as u32);
            } else {
                if run.len() >= self.config.quiet_min_run {
                    quiet.extend(run.iter().copied());
                }
                run.clear();
            }
        }
        quiet.sort_unstable();
        quiet
    }

    fn rebuild_sentiment_preferences(
        &self,
        profile: &mut UserProfile,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
    ) {
        let mut positive = 0.0;
        let mut neutral = 0.0;
        let mut negative = 0.0;
        for event in events {
            let Some(content) = event.content_id.and_then(|id| contents.get(&id)) else {
                continue;
            };
            if content.sentiment_score > 0.3 {
                positive += 1.0;
            } else if content.sentiment_score < -0.3 {
                negative += 1.0;
            } else {
                neutral += 1.0;
            }
        }
        let total = positive + neutral + negative;
        if total > 0.0 {
            profile.sentiment_preferences = SentimentPreferences {
                positive: positive / total,
                neutral: neutral / total,
                negative: negative / total,
            };
        }
    }

    /// Weekly-window trend and variance per category
    fn evolution_labels(
        &self,
        events: &[BehaviorEvent],
        contents: &HashMap<Uuid, ContentItem>,
        now: DateTime<Utc>,
    ) -> HashMap<String, InterestEvolution> {
        let weeks = self.config.evolution_weeks as usize;
        let mut weekly: HashMap<String, Vec<f64>> = HashMap::new();

        for event in events {
            let Some(content) = event.content_id.and_then(|id| contents.get(&id)) else {
                continue;
            };
            let days_ago = (now - event.timestamp).num_days();
            if days_ago < 0 {
                continue;
            }
            let week = (days_ago / 7) as usize;
            if week >= weeks {
                continue;
            }
            weekly
                .entry(content.category.clone())
                .or_insert_with(|| vec![0.0; weeks])[week] += 1.0;
        }

        weekly
            .into_iter()
            .map(|(category, counts)| {
                let recent = counts[0];
                let earlier: Vec<f64> = counts[1..].to_vec();
                let earlier_mean = if earlier.is_empty() {
                    0.0
                } else {
                    earlier.iter().sum::<f64>() / earlier.len() as f64
                };

                let label = if earlier_mean == 0.0 {
                    if recent > 0.0 {
                        InterestEvolution::Emerging
                    } else {
                        InterestEvolution::Stable
                    }
                } else {
                    let ratio = recent / earlier_mean;
                    let mean = counts.iter().sum::<f64>() / counts.len() as f64;
                    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
                        / counts.len() as f64;
                    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
                    if ratio > 1.5 {
                        InterestEvolution::Emerging
                    } else if ratio < 0.5 {
                        InterestEvolution::Declining
                    } else if cv > 0.75 {
                        InterestEvolution::Seasonal
                    } else {
                        InterestEvolution::Stable
                    }
                };
                (category, label)
            })
            .collect()
    }

    /// Exponential moving update of the per-channel affinity from
    /// notification feedback
    pub fn update_channel_affinity(
        profile: &mut UserProfile,
        channel: NotificationChannel,
        engaged: bool,
    ) {
        let target = if engaged { 1.0 } else { 0.0 };
        let affinity = profile.device_preferences.entry(channel).or_insert(0.5);
        *affinity = (0.8 * *affinity + 0.2 * target).clamp(0.0, 1.0);
    }
}

impl Default for InterestProfileBuilder {
    fn default() -> Self {
        Self::new(InterestBuilderConfig::default())
    }
}

fn social_action_weight(event_type: EventType) -> f64 {
    match event_type {
        EventType::Comment => 3.0,
        EventType::Share => 2.5,
        EventType::Bookmark => 2.0,
        EventType::Like => 1.5,
        EventType::ReadComplete => 1.0,
        EventType::Click => 0.5,
        _ => 0.0,
    }
}

fn normalized(mut map: HashMap<String, f64>) -> HashMap<String, f64> {
    normalize_in_place(&mut map);
    map
}

fn normalize_in_place(map: &mut HashMap<String, f64>) {
    let total: f64 = map.values().sum();
    if total > 0.0 {
        for value in map.values_mut() {
            *value /= total;
        }
    }
}

fn accumulate(target: &mut HashMap<String, f64>, source: HashMap<String, f64>, weight: f64) {
    for (name, value) in source {
        *target.entry(name).or_insert(0.0) += value * weight;
    }
}
