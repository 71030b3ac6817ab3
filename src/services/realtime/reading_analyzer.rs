// ============================================
// Reading Session Analyzer
// ============================================
//
// Turns the time-ordered scroll/pause/click events for one
// (user, content) pair into a session summary:
// 1. Scroll pattern from speed mean/variance
// 2. Pauses = gaps >= 5s between consecutive events
// 3. Active reading time, reading speed, completion
// 4. Intent classification from a fixed rule table
// 5. Engagement score and quality indicators

use super::{RealtimeError, Result};
use crate::models::{BehaviorEvent, EventType, ScrollDirection};
use serde::{Deserialize, Serialize};

/// Scroll behavior classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPattern {
    FastConsistent,
    SlowConsistent,
    Erratic,
    FastScanning,
    NormalReading,
    NoScroll,
}

/// Session-level intent classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadingIntent {
    Scanning,
    FocusedReading,
    Searching,
    CasualBrowsing,
    Research,
    Entertainment,
}

/// A detected reading pause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingPause {
    pub duration_secs: f64,
    /// Scroll position where the pause happened, if known
    pub position: Option<f64>,
}

/// Quality indicators derived alongside the main summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIndicators {
    /// Fraction of scroll events moving back up
    pub back_scroll_ratio: f64,
    /// Steadiness of scroll speed, 1 at zero variance
    pub speed_steadiness: f64,
    /// Sections the user lingered on (pause count)
    pub focused_sections: usize,
    /// Sections skimmed at very high speed
    pub skipped_sections: usize,
    /// like/share/comment/click count / 5, capped at 1
    pub interaction_depth: f64,
}

/// Full session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingSession {
    pub pattern: ScrollPattern,
    pub intent: ReadingIntent,
    pub pauses: Vec<ReadingPause>,
    pub active_reading_secs: f64,
    pub reading_speed_wpm: f64,
    /// Max scroll position fraction reached, in [0, 1]
    pub completion_rate: f64,
    pub engagement_score: f64,
    pub quality: QualityIndicators,
}

#[derive(Debug, Clone)]
pub struct ReadingAnalyzerConfig {
    /// Gap length that counts as a pause
    pub pause_gap_secs: f64,
    /// Variance at or below which scrolling counts as consistent
    pub consistent_variance_max: f64,
    /// Variance at or above which scrolling counts as erratic
    pub erratic_variance_min: f64,
    /// Mean speed above which consistent scrolling is fast
    pub fast_speed_min: f64,
    /// Mean speed below which consistent scrolling is slow
    pub slow_speed_max: f64,
    /// Mean speed above which the session is outright scanning
    pub scanning_speed_min: f64,
    /// Scroll speed above which a single event counts as a skip
    pub skip_speed_min: f64,
    /// Words-per-minute baseline for the time component
    pub expected_wpm: f64,
}

impl Default for ReadingAnalyzerConfig {
    fn default() -> Self {
        Self {
            pause_gap_secs: 5.0,
            consistent_variance_max: 50.0,
            erratic_variance_min: 500.0,
            fast_speed_min: 400.0,
            slow_speed_max: 300.0,
            scanning_speed_min: 800.0,
            skip_speed_min: 1000.0,
            expected_wpm: 200.0,
        }
    }
}

/// Analyzer over one content session's events
pub struct ReadingAnalyzer {
    config: ReadingAnalyzerConfig,
}

impl ReadingAnalyzer {
    pub fn new(config: ReadingAnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a time-ordered event slice for one (user, content) pair.
    /// `word_count` is the content length used for the speed estimate.
    pub fn analyze(&self, events: &[BehaviorEvent], word_count: u32) -> Result<ReadingSession> {
        if events.is_empty() {
            return Err(RealtimeError::InvalidData(
                "no events to analyze".to_string(),
            ));
        }

        let scroll_speeds: Vec<f64> = events
            .iter()
            .filter(|e| e.event_type == EventType::Scroll)
            .filter_map(|e| e.metadata.scroll_speed)
            .collect();

        let (speed_mean, speed_variance) = mean_and_variance(&scroll_speeds);
        let pattern = self.classify_pattern(&scroll_speeds, speed_mean, speed_variance);

        let pauses = self.detect_pauses(events);
        let elapsed_secs = (events[events.len() - 1].timestamp - events[0].timestamp)
            .num_milliseconds() as f64
            / 1000.0;
        let pause_total: f64 = pauses.iter().map(|p| p.duration_secs).sum();
        let active_reading_secs = (elapsed_secs - pause_total).max(0.0);

        let reading_speed_wpm = if active_reading_secs > 0.0 {
            word_count as f64 / (active_reading_secs / 60.0)
        } else {
            0.0
        };

        let completion_rate = events
            .iter()
            .filter_map(|e| e.metadata.scroll_position)
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0);

        let intent = self.classify_intent(pattern, &pauses, speed_mean);

        let engagement_score = self.engagement_score(
            active_reading_secs,
            word_count,
            pattern,
            &pauses,
            completion_rate,
        );

        let quality = self.quality_indicators(events, &scroll_speeds, speed_variance, &pauses);

        Ok(ReadingSession {
            pattern,
            intent,
            pauses,
            active_reading_secs,
            reading_speed_wpm,
            completion_rate,
            engagement_score,
            quality,
        })
    }

    fn classify_pattern(&self, speeds: &[f64], mean: f64, variance: f64) -> ScrollPattern {
        if speeds.is_empty() {
            return ScrollPattern::NoScroll;
        }
        if mean >= self.config.scanning_speed_min {
            return ScrollPattern::FastScanning;
        }
        if variance <= self.config.consistent_variance_max {
            if mean >= self.config.fast_speed_min {
                return ScrollPattern::FastConsistent;
            }
            if mean <= self.config.slow_speed_max {
                return ScrollPattern::SlowConsistent;
            }
            return ScrollPattern::NormalReading;
        }
        if variance >= self.config.erratic_variance_min {
            return ScrollPattern::Erratic;
        }
        ScrollPattern::NormalReading
    }

    fn detect_pauses(&self, events: &[BehaviorEvent]) -> Vec<ReadingPause> {
        let mut pauses = Vec::new();
        for pair in events.windows(2) {
            let gap_secs =
                (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0;
            if gap_secs >= self.config.pause_gap_secs {
                pauses.push(ReadingPause {
                    duration_secs: gap_secs,
                    position: pair[0].metadata.scroll_position,
                });
            }
        }
        pauses
    }

    /// Fixed rule table over pattern, pause stats, and speed
    fn classify_intent(
        &self,
        pattern: ScrollPattern,
        pauses: &[ReadingPause],
        speed_mean: f64,
    ) -> ReadingIntent {
        let pause_count = pauses.len();
        let avg_pause = if pause_count > 0 {
            pauses.iter().map(|p| p.duration_secs).sum::<f64>() / pause_count as f64
        } else {
            0.0
        };

        if matches!(pattern, ScrollPattern::FastScanning)
            || (pattern == ScrollPattern::FastConsistent && speed_mean > self.config.fast_speed_min)
        {
            return ReadingIntent::Scanning;
        }
        if pattern == ScrollPattern::SlowConsistent && pause_count >= 4 && avg_pause > 10.0 {
            return ReadingIntent::FocusedReading;
        }
        if pattern == ScrollPattern::Erratic && pause_count >= 5 {
            return ReadingIntent::Searching;
        }
        match pause_count {
            n if n >= 6 => ReadingIntent::Research,
            n if n >= 2 => ReadingIntent::CasualBrowsing,
            _ => ReadingIntent::Entertainment,
        }
    }

    /// Weighted sum {time .3, scroll-pattern .2, pause .2, completion .3}
    fn engagement_score(
        &self,
        active_reading_secs: f64,
        word_count: u32,
        pattern: ScrollPattern,
        pauses: &[ReadingPause],
        completion_rate: f64,
    ) -> f64 {
        let expected_secs = if word_count > 0 {
            word_count as f64 / self.config.expected_wpm * 60.0
        } else {
            60.0
        };
        let time_score = (active_reading_secs / expected_secs).min(1.0);

        let pattern_score = match pattern {
            ScrollPattern::SlowConsistent | ScrollPattern::NormalReading => 1.0,
            ScrollPattern::FastConsistent => 0.6,
            ScrollPattern::NoScroll => 0.5,
            ScrollPattern::Erratic => 0.4,
            ScrollPattern::FastScanning => 0.3,
        };

        // Pauses between 5s and 60s read as genuine reading pauses
        let pause_score = if pauses.is_empty() {
            0.3
        } else {
            let meaningful = pauses
                .iter()
                .filter(|p| p.duration_secs <= 60.0)
                .count();
            meaningful as f64 / pauses.len() as f64
        };

        let score = 0.3 * time_score
            + 0.2 * pattern_score
            + 0.2 * pause_score
            + 0.3 * completion_rate;
        score.clamp(0.0, 1.0)
    }

    fn quality_indicators(
        &self,
        events: &[BehaviorEvent],
        scroll_speeds: &[f64],
        speed_variance: f64,
        pauses: &[ReadingPause],
    ) -> QualityIndicators {
        let scroll_events: Vec<&BehaviorEvent> = events
            .iter()
            .filter(|e| e.event_type == EventType::Scroll)
            .collect();

        let back_scrolls = scroll_events
            .iter()
            .filter(|e| e.metadata.scroll_direction == Some(ScrollDirection::Up))
            .count();
        let back_scroll_ratio = if scroll_events.is_empty() {
            0.0
        } else {
            back_scrolls as f64 / scroll_events.len() as f64
        };

        let speed_steadiness = 1.0 / (1.0 + speed_variance / 100.0);

        let skipped_sections = scroll_speeds
            .iter()
            .filter(|&&s| s >= self.config.skip_speed_min)
            .count();

        let interactions = events
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    EventType::Like | EventType::Share | EventType::Comment | EventType::Click
                )
            })
            .count();
        let interaction_depth = (interactions as f64 / 5.0).min(1.0);

        QualityIndicators {
            back_scroll_ratio,
            speed_steadiness,
            focused_sections: pauses.len(),
            skipped_sections,
            interaction_depth,
        }
    }
}

impl Default for ReadingAnalyzer {
    fn default() -> Self {
        Self::new(ReadingAnalyzerConfig::default())
    }
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance)
}
