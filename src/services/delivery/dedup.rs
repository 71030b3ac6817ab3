// ============================================
// Anti-Duplication Engine
// ============================================
//
// Blocks near-duplicate notifications with a per-type rule table:
// - exact_match: hash over a configured field subset
// - content_similarity: token-Jaccard over title + message
// - category_based: too many same-category notifications in-window
// - time_based: same type + content id already sent in-window
//
// Non-duplicates leave a hash record behind (7-day TTL, purged lazily).
// The check-then-record sequence runs inside one per-user critical
// section so two concurrent candidates cannot both pass.

use super::rules::{matches_all, RuleCondition};
use crate::models::{Notification, NotificationType};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DedupStrategy {
    /// Hash over the listed field paths; any stored match in-window blocks
    ExactMatch { fields: Vec<String> },
    /// Token-Jaccard similarity over title + message
    ContentSimilarity { threshold: f64 },
    /// Blocks once `max_in_window` prior notifications share the category
    /// (and author, when set)
    CategoryBased {
        max_in_window: usize,
        include_author: bool,
    },
    /// Any prior notification sharing type + content id in-window blocks
    TimeBased,
}

impl DedupStrategy {
    fn name(&self) -> &'static str {
        match self {
            DedupStrategy::ExactMatch { .. } => "exact_match",
            DedupStrategy::ContentSimilarity { .. } => "content_similarity",
            DedupStrategy::CategoryBased { .. } => "category_based",
            DedupStrategy::TimeBased => "time_based",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRule {
    pub name: String,
    /// None applies the rule to every notification type
    pub applies_to: Option<NotificationType>,
    pub strategy: DedupStrategy,
    pub window_minutes: i64,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub notification_id: Uuid,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCheck {
    pub is_duplicate: bool,
    pub reason: Option<String>,
    pub matches: Vec<DuplicateMatch>,
    pub suggestion: Option<String>,
}

impl DedupCheck {
    fn clean() -> Self {
        Self {
            is_duplicate: false,
            reason: None,
            matches: Vec::new(),
            suggestion: None,
        }
    }
}

#[derive(Debug, Clone)]
struct DuplicationRecord {
    hash: String,
    /// Origin of the record; a notification never duplicates itself
    /// when it re-enters the pipeline after scheduling
    notification_id: Uuid,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Hash record TTL
    pub record_ttl_days: i64,
    pub rules: Vec<DedupRule>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            record_ttl_days: 7,
            rules: vec![
                DedupRule {
                    name: "breaking-repeat".to_string(),
                    applies_to: Some(NotificationType::BreakingNews),
                    strategy: DedupStrategy::TimeBased,
                    window_minutes: 30,
                    conditions: Vec::new(),
                },
                DedupRule {
                    name: "recommendation-overlap".to_string(),
                    applies_to: Some(NotificationType::Recommendation),
                    strategy: DedupStrategy::ContentSimilarity { threshold: 0.5 },
                    window_minutes: 360,
                    conditions: Vec::new(),
                },
                DedupRule {
                    name: "social-category-pileup".to_string(),
                    applies_to: Some(NotificationType::SocialInteraction),
                    strategy: DedupStrategy::CategoryBased {
                        max_in_window: 3,
                        include_author: true,
                    },
                    window_minutes: 60,
                    conditions: Vec::new(),
                },
                DedupRule {
                    name: "exact-repeat".to_string(),
                    applies_to: None,
                    strategy: DedupStrategy::ExactMatch {
                        fields: vec![
                            "user_id".to_string(),
                            "content_id".to_string(),
                            "title".to_string(),
                        ],
                    },
                    window_minutes: 24 * 60,
                    conditions: Vec::new(),
                },
            ],
        }
    }
}

pub struct AntiDuplicationEngine {
    config: DedupConfig,
    records: DashMap<Uuid, Vec<DuplicationRecord>>,
}

impl AntiDuplicationEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    /// Run the rule table against the candidate and the user's recent
    /// notifications; record hashes when the candidate is clean. The
    /// per-user map entry is held for the whole check-then-record
    /// sequence.
    pub fn check_and_record(
        &self,
        candidate: &Notification,
        recent: &[Notification],
        now: DateTime<Utc>,
    ) -> DedupCheck {
        let subject = match serde_json::to_value(candidate) {
            Ok(value) => value,
            Err(_) => return DedupCheck::clean(),
        };

        let mut records = self.records.entry(candidate.user_id).or_default();
        let ttl_cutoff = now - Duration::days(self.config.record_ttl_days);
        records.retain(|r| r.recorded_at >= ttl_cutoff);

        let mut clean_hashes = Vec::new();
        for rule in &self.config.rules {
            if let Some(applies_to) = rule.applies_to {
                if applies_to != candidate.notification_type {
                    continue;
                }
            }
            if !matches_all(&rule.conditions, &subject) {
                continue;
            }

            let window_start = now - Duration::minutes(rule.window_minutes);
            let in_window: Vec<&Notification> = recent
                .iter()
                .filter(|n| n.id != candidate.id && n.created_at >= window_start)
                .collect();

            let check = match &rule.strategy {
                DedupStrategy::ExactMatch { fields } => {
                    let hash = field_hash(&subject, fields);
                    let duplicate = records.iter().any(|r| {
                        r.hash == hash
                            && r.notification_id != candidate.id
                            && r.recorded_at >= window_start
                    });
                    if duplicate {
                        Some(DedupCheck {
                            is_duplicate: true,
                            reason: Some(format!("exact_match rule '{}'", rule.name)),
                            matches: Vec::new(),
                            suggestion: Some(
                                "drop; identical notification already sent".to_string(),
                            ),
                        })
                    } else {
                        clean_hashes.push(hash);
                        None
                    }
                }
                DedupStrategy::ContentSimilarity { threshold } => {
                    self.similarity_check(candidate, &in_window, *threshold, rule)
                }
                DedupStrategy::CategoryBased {
                    max_in_window,
                    include_author,
                } => self.category_check(candidate, &in_window, *max_in_window, *include_author, rule),
                DedupStrategy::TimeBased => self.time_check(candidate, &in_window, rule, now),
            };

            if let Some(check) = check {
                debug!(
                    user_id = %candidate.user_id,
                    rule = rule.name.as_str(),
                    strategy = rule.strategy.name(),
                    "Duplicate blocked"
                );
                return check;
            }
        }

        for hash in clean_hashes {
            let already = records
                .iter()
                .any(|r| r.hash == hash && r.notification_id == candidate.id);
            if !already {
                records.push(DuplicationRecord {
                    hash,
                    notification_id: candidate.id,
                    recorded_at: now,
                });
            }
        }
        DedupCheck::clean()
    }

    fn similarity_check(
        &self,
        candidate: &Notification,
        in_window: &[&Notification],
        threshold: f64,
        rule: &DedupRule,
    ) -> Option<DedupCheck> {
        let candidate_tokens = tokenize(&format!("{} {}", candidate.title, candidate.message));
        if candidate_tokens.is_empty() {
            return None;
        }

        let mut matches: Vec<DuplicateMatch> = in_window
            .iter()
            .filter_map(|n| {
                let tokens = tokenize(&format!("{} {}", n.title, n.message));
                let similarity = jaccard(&candidate_tokens, &tokens);
                (similarity >= threshold).then_some(DuplicateMatch {
                    notification_id: n.id,
                    similarity,
                })
            })
            .collect();

        if matches.is_empty() {
            return None;
        }
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(3);

        Some(DedupCheck {
            is_duplicate: true,
            reason: Some(format!("content_similarity rule '{}'", rule.name)),
            matches,
            suggestion: Some("rephrase or wait for the window to pass".to_string()),
        })
    }

    fn category_check(
        &self,
        candidate: &Notification,
        in_window: &[&Notification],
        max_in_window: usize,
        include_author: bool,
        rule: &DedupRule,
    ) -> Option<DedupCheck> {
        let category = candidate.custom_data.get("category")?;
        let author = candidate.custom_data.get("author");

        let same: Vec<&&Notification> = in_window
            .iter()
            .filter(|n| {
                n.custom_data.get("category") == Some(category)
                    && (!include_author || n.custom_data.get("author") == author)
            })
            .collect();

        if same.len() >= max_in_window {
            Some(DedupCheck {
                is_duplicate: true,
                reason: Some(format!("category_based rule '{}'", rule.name)),
                matches: same
                    .iter()
                    .take(3)
                    .map(|n| DuplicateMatch {
                        notification_id: n.id,
                        similarity: 1.0,
                    })
                    .collect(),
                suggestion: Some("bundle into a digest instead".to_string()),
            })
        } else {
            None
        }
    }

    fn time_check(
        &self,
        candidate: &Notification,
        in_window: &[&Notification],
        rule: &DedupRule,
        now: DateTime<Utc>,
    ) -> Option<DedupCheck> {
        let content_id = candidate.content_id?;
        let prior = in_window.iter().find(|n| {
            n.notification_type == candidate.notification_type && n.content_id == Some(content_id)
        })?;

        let window = Duration::minutes(rule.window_minutes);
        let remaining = (prior.created_at + window - now).num_seconds().max(0);
        Some(DedupCheck {
            is_duplicate: true,
            reason: Some(format!("time_based rule '{}'", rule.name)),
            matches: vec![DuplicateMatch {
                notification_id: prior.id,
                similarity: 1.0,
            }],
            suggestion: Some(format!("retry in {} seconds", remaining)),
        })
    }

    pub fn erase(&self, user_id: Uuid) {
        self.records.remove(&user_id);
    }
}

impl Default for AntiDuplicationEngine {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

/// Hash of the resolved field values, order-stable
fn field_hash(subject: &serde_json::Value, fields: &[String]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        let value = field
            .split('.')
            .try_fold(subject, |acc, seg| acc.get(seg))
            .map(|v| v.to_string())
            .unwrap_or_default();
        hasher.update(value.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "you", "your", "this", "that", "from", "has", "have", "are",
    "was", "were", "will", "now", "new", "just",
];

/// Lowercase, strip non-letters, drop stop-words and short tokens
pub(crate) fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| t.len() >= 3 && !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(
    a: &std::collections::HashSet<String>,
    b: &std::collections::HashSet<String>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationPriority;

    fn notification(
        user_id: Uuid,
        notification_type: NotificationType,
        title: &str,
        content_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Notification {
        let mut n = Notification::new(user_id, notification_type, NotificationPriority::Medium, at);
        n.title = title.to_string();
        n.message = format!("{} message body", title);
        n.content_id = content_id;
        n
    }

    #[test]
    fn test_exact_repeat_blocked_on_second_call() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let now = Utc::now();

        let first = notification(
            user_id,
            NotificationType::System,
            "Maintenance window",
            Some(content_id),
            now,
        );
        let check = engine.check_and_record(&first, &[], now);
        assert!(!check.is_duplicate);

        let mut second = notification(
            user_id,
            NotificationType::System,
            "Maintenance window",
            Some(content_id),
            now + Duration::minutes(5),
        );
        second.id = Uuid::new_v4();
        let check = engine.check_and_record(&second, &[], now + Duration::minutes(5));
        assert!(check.is_duplicate);
        assert!(check.reason.as_deref().unwrap().contains("exact_match"));
    }

    #[test]
    fn test_time_based_rule_for_breaking_news() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let now = Utc::now();

        let first = notification(
            user_id,
            NotificationType::BreakingNews,
            "Quake hits coast",
            Some(content_id),
            now,
        );
        assert!(!engine.check_and_record(&first, &[], now).is_duplicate);

        let later = now + Duration::minutes(10);
        let second = notification(
            user_id,
            NotificationType::BreakingNews,
            "Quake hits coast - update",
            Some(content_id),
            later,
        );
        let check = engine.check_and_record(&second, &[first], later);
        assert!(check.is_duplicate);
        assert!(check.reason.as_deref().unwrap().contains("time_based"));
        assert!(check.suggestion.as_deref().unwrap().contains("retry in"));
    }

    #[test]
    fn test_similarity_rule_returns_top_matches() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let recent: Vec<Notification> = (0..4)
            .map(|i| {
                notification(
                    user_id,
                    NotificationType::Recommendation,
                    "Quantum computing breakthrough announced today",
                    Some(Uuid::new_v4()),
                    now - Duration::minutes(i * 10),
                )
            })
            .collect();

        let candidate = notification(
            user_id,
            NotificationType::Recommendation,
            "Quantum computing breakthrough announced today",
            Some(Uuid::new_v4()),
            now,
        );
        let check = engine.check_and_record(&candidate, &recent, now);
        assert!(check.is_duplicate);
        assert!(check
            .reason
            .as_deref()
            .unwrap()
            .contains("content_similarity"));
        assert!(check.matches.len() <= 3);
        assert!(check.matches.iter().all(|m| m.similarity >= 0.5));
    }

    #[test]
    fn test_dissimilar_recommendation_passes() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let recent = vec![notification(
            user_id,
            NotificationType::Recommendation,
            "Local bakery wins regional pastry award",
            Some(Uuid::new_v4()),
            now - Duration::minutes(5),
        )];
        let candidate = notification(
            user_id,
            NotificationType::Recommendation,
            "Championship finals schedule released",
            Some(Uuid::new_v4()),
            now,
        );
        assert!(!engine.check_and_record(&candidate, &recent, now).is_duplicate);
    }

    #[test]
    fn test_category_pileup_blocked() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let recent: Vec<Notification> = (0..3)
            .map(|i| {
                let mut n = notification(
                    user_id,
                    NotificationType::SocialInteraction,
                    &format!("Someone liked your comment {}", i),
                    Some(Uuid::new_v4()),
                    now - Duration::minutes(i * 5 + 1),
                );
                n.custom_data
                    .insert("category".to_string(), "replies".to_string());
                n.custom_data
                    .insert("author".to_string(), "alex".to_string());
                n
            })
            .collect();

        let mut candidate = notification(
            user_id,
            NotificationType::SocialInteraction,
            "Someone liked your comment again",
            Some(Uuid::new_v4()),
            now,
        );
        candidate
            .custom_data
            .insert("category".to_string(), "replies".to_string());
        candidate
            .custom_data
            .insert("author".to_string(), "alex".to_string());

        let check = engine.check_and_record(&candidate, &recent, now);
        assert!(check.is_duplicate);
        assert!(check.reason.as_deref().unwrap().contains("category_based"));
    }

    #[test]
    fn test_records_expire_after_window() {
        let engine = AntiDuplicationEngine::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let now = Utc::now();

        let first = notification(
            user_id,
            NotificationType::System,
            "Weekly summary ready",
            Some(content_id),
            now,
        );
        engine.check_and_record(&first, &[], now);

        // Well past the 24h exact-match window
        let later = now + Duration::days(2);
        let second = notification(
            user_id,
            NotificationType::System,
            "Weekly summary ready",
            Some(content_id),
            later,
        );
        assert!(!engine.check_and_record(&second, &[], later).is_duplicate);
    }

    #[test]
    fn test_tokenize_strips_noise() {
        let tokens = tokenize("The QUICK-brown fox, and a dog! 42");
        assert!(tokens.contains("quick"));
        assert!(tokens.contains("brown"));
        assert!(tokens.contains("fox"));
        assert!(tokens.contains("dog"));
        assert!(!tokens.contains("the"));
        assert!(!tokens.contains("and"));
        assert!(!tokens.contains("a"));
        assert!(!tokens.contains("42"));
    }
}
