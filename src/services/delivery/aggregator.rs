// ============================================
// Notification Aggregator
// ============================================
//
// Merges simultaneous notifications into digests. Notifications buffer
// per user with 4h retention; an ordered rule list groups them by type,
// category, author, time run, or the smart strategy (breaking-news
// clusters, social interactions per content, similar recommendations).
// Consumed members never regroup, and the whole pass runs under the
// user's buffer lock so concurrent aggregation cannot double-group.

use super::dedup::tokenize;
use super::rules::{matches_all, RuleCondition};
use crate::models::{
    GroupSummary, GroupingStrategy, Notification, NotificationGroup, NotificationType,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRule {
    pub name: String,
    pub strategy: GroupingStrategy,
    /// None lets the rule consider every type (the smart strategy still
    /// only understands its three passes)
    pub applies_to: Option<NotificationType>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub max_group_size: usize,
    pub window_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub retention_hours: i64,
    /// Shared title tokens for a breaking-news cluster
    pub breaking_token_overlap: usize,
    /// Title-token Jaccard threshold for recommendation clusters
    pub recommendation_similarity: f64,
    pub rules: Vec<AggregationRule>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            retention_hours: 4,
            breaking_token_overlap: 3,
            recommendation_similarity: 0.3,
            rules: vec![
                AggregationRule {
                    name: "smart-digest".to_string(),
                    strategy: GroupingStrategy::Smart,
                    applies_to: None,
                    conditions: Vec::new(),
                    max_group_size: 10,
                    window_minutes: 30,
                },
                AggregationRule {
                    name: "system-batch".to_string(),
                    strategy: GroupingStrategy::ByType,
                    applies_to: Some(NotificationType::System),
                    conditions: Vec::new(),
                    max_group_size: 5,
                    window_minutes: 60,
                },
            ],
        }
    }
}

struct Buffered {
    notification: Notification,
    consumed: bool,
}

pub struct Aggregator {
    config: AggregatorConfig,
    buffers: DashMap<Uuid, Vec<Buffered>>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            buffers: DashMap::new(),
        }
    }

    /// Add a notification to the user's buffer
    pub fn buffer_notification(&self, notification: &Notification) {
        let mut buffer = self.buffers.entry(notification.user_id).or_default();
        let cutoff = notification.created_at - Duration::hours(self.config.retention_hours);
        buffer.retain(|b| b.notification.created_at >= cutoff);
        buffer.push(Buffered {
            notification: notification.clone(),
            consumed: false,
        });
    }

    /// Full aggregation pass over the user's unconsumed buffer. Every
    /// matched notification is consumed; chunks of one become singleton
    /// groups. Re-running over an already-consumed buffer yields nothing.
    pub fn aggregate(&self, user_id: Uuid, now: DateTime<Utc>) -> Vec<NotificationGroup> {
        let mut buffer = match self.buffers.get_mut(&user_id) {
            Some(buffer) => buffer,
            None => return Vec::new(),
        };

        let mut groups = Vec::new();
        for rule in &self.config.rules {
            let clusters = self.cluster_for_rule(rule, &buffer, now);
            for cluster in clusters {
                let members = take_members(&mut buffer, &cluster);
                if members.is_empty() {
                    continue;
                }
                let strategy = rule.strategy;
                let summary = summarize(strategy, &members);
                groups.push(NotificationGroup::new(user_id, members, strategy, summary, now));
            }
        }

        let mut groups = merge_singleton_groups(user_id, groups, now);
        groups.sort_by_key(|g| std::cmp::Reverse(g.priority.rank()));
        if !groups.is_empty() {
            debug!(user_id = %user_id, group_count = groups.len(), "Aggregation pass");
        }
        groups
    }

    /// Pipeline entry: buffer the candidate and group it with pending
    /// notifications if a rule merges it with at least one other. The
    /// candidate stays buffered (unconsumed) when nothing merges.
    pub fn try_group_candidate(
        &self,
        candidate: &Notification,
        now: DateTime<Utc>,
    ) -> Option<NotificationGroup> {
        self.buffer_notification(candidate);
        let mut buffer = self.buffers.get_mut(&candidate.user_id)?;

        for rule in &self.config.rules {
            let clusters = self.cluster_for_rule(rule, &buffer, now);
            if let Some(cluster) = clusters
                .into_iter()
                .find(|c| c.len() >= 2 && c.contains(&candidate.id))
            {
                let members = take_members(&mut buffer, &cluster);
                let summary = summarize(rule.strategy, &members);
                return Some(NotificationGroup::new(
                    candidate.user_id,
                    members,
                    rule.strategy,
                    summary,
                    now,
                ));
            }
        }
        None
    }

    /// Cluster the rule's matching unconsumed notifications into id sets
    fn cluster_for_rule(
        &self,
        rule: &AggregationRule,
        buffer: &[Buffered],
        now: DateTime<Utc>,
    ) -> Vec<Vec<Uuid>> {
        let window_start = now - Duration::hours(self.config.retention_hours);
        let mut matched: Vec<&Notification> = buffer
            .iter()
            .filter(|b| !b.consumed && b.notification.created_at >= window_start)
            .map(|b| &b.notification)
            .filter(|n| {
                rule.applies_to
                    .map(|t| t == n.notification_type)
                    .unwrap_or(true)
            })
            .filter(|n| {
                serde_json::to_value(n)
                    .map(|subject| matches_all(&rule.conditions, &subject))
                    .unwrap_or(false)
            })
            .collect();
        matched.sort_by_key(|n| n.created_at);

        match rule.strategy {
            GroupingStrategy::Smart => self.smart_clusters(rule, &matched),
            GroupingStrategy::ByType => {
                keyed_clusters(rule, &matched, |n| Some(n.notification_type.as_str().to_string()))
            }
            GroupingStrategy::ByCategory => {
                keyed_clusters(rule, &matched, |n| n.custom_data.get("category").cloned())
            }
            GroupingStrategy::ByAuthor => {
                keyed_clusters(rule, &matched, |n| n.custom_data.get("author").cloned())
            }
            GroupingStrategy::ByTime => keyed_clusters(rule, &matched, |_| Some(String::new())),
        }
    }

    /// Three passes: breaking-news by category or shared title tokens,
    /// social interactions by content id, recommendations by title
    /// similarity. Leftovers of those types become singles.
    fn smart_clusters(
        &self,
        rule: &AggregationRule,
        matched: &[&Notification],
    ) -> Vec<Vec<Uuid>> {
        let mut clusters: Vec<Vec<Uuid>> = Vec::new();
        let mut assigned: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        // Pass 1: breaking news sharing a category or enough title tokens
        let breaking: Vec<&&Notification> = matched
            .iter()
            .filter(|n| n.notification_type == NotificationType::BreakingNews)
            .collect();
        for (i, seed) in breaking.iter().enumerate() {
            if assigned.contains(&seed.id) {
                continue;
            }
            let seed_tokens = tokenize(&seed.title);
            let seed_category = seed.custom_data.get("category");
            let mut cluster = vec![seed.id];
            for other in breaking.iter().skip(i + 1) {
                if assigned.contains(&other.id) || cluster.len() >= rule.max_group_size {
                    continue;
                }
                let same_category =
                    seed_category.is_some() && other.custom_data.get("category") == seed_category;
                let shared_tokens = tokenize(&other.title)
                    .intersection(&seed_tokens)
                    .count();
                if same_category || shared_tokens >= self.breaking_overlap() {
                    cluster.push(other.id);
                }
            }
            if cluster.len() >= 2 {
                for id in &cluster {
                    assigned.insert(*id);
                }
                clusters.push(cluster);
            }
        }

        // Pass 2: social interactions on the same content
        let mut by_content: std::collections::HashMap<Uuid, Vec<Uuid>> =
            std::collections::HashMap::new();
        for n in matched
            .iter()
            .filter(|n| n.notification_type == NotificationType::SocialInteraction)
            .filter(|n| !assigned.contains(&n.id))
        {
            if let Some(content_id) = n.content_id {
                by_content.entry(content_id).or_default().push(n.id);
            }
        }
        let mut content_ids: Vec<Uuid> = by_content.keys().copied().collect();
        content_ids.sort();
        for content_id in content_ids {
            let ids = &by_content[&content_id];
            if ids.len() >= 2 {
                for chunk in ids.chunks(rule.max_group_size) {
                    if chunk.len() >= 2 {
                        for id in chunk {
                            assigned.insert(*id);
                        }
                        clusters.push(chunk.to_vec());
                    }
                }
            }
        }

        // Pass 3: recommendations with similar titles
        let recommendations: Vec<&&Notification> = matched
            .iter()
            .filter(|n| n.notification_type == NotificationType::Recommendation)
            .filter(|n| !assigned.contains(&n.id))
            .collect();
        for (i, seed) in recommendations.iter().enumerate() {
            if assigned.contains(&seed.id) {
                continue;
            }
            let seed_tokens = tokenize(&seed.title);
            let mut cluster = vec![seed.id];
            for other in recommendations.iter().skip(i + 1) {
                if assigned.contains(&other.id) || cluster.len() >= rule.max_group_size {
                    continue;
                }
                let other_tokens = tokenize(&other.title);
                let intersection = seed_tokens.intersection(&other_tokens).count();
                let union = seed_tokens.union(&other_tokens).count();
                let similarity = if union == 0 {
                    0.0
                } else {
                    intersection as f64 / union as f64
                };
                if similarity > self.config.recommendation_similarity {
                    cluster.push(other.id);
                }
            }
            if cluster.len() >= 2 {
                for id in &cluster {
                    assigned.insert(*id);
                }
                clusters.push(cluster);
            }
        }

        // Leftovers of the smart types become singles
        for n in matched.iter().filter(|n| {
            matches!(
                n.notification_type,
                NotificationType::BreakingNews
                    | NotificationType::SocialInteraction
                    | NotificationType::Recommendation
            )
        }) {
            if !assigned.contains(&n.id) {
                clusters.push(vec![n.id]);
            }
        }

        clusters
    }

    fn breaking_overlap(&self) -> usize {
        self.config.breaking_token_overlap
    }

    pub fn pending_count(&self, user_id: Uuid) -> usize {
        self.buffers
            .get(&user_id)
            .map(|b| b.iter().filter(|n| !n.consumed).count())
            .unwrap_or(0)
    }

    pub fn erase(&self, user_id: Uuid) {
        self.buffers.remove(&user_id);
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

/// Sort by time, split into runs where consecutive gaps stay inside the
/// window, then chunk runs to the max group size.
fn keyed_clusters(
    rule: &AggregationRule,
    matched: &[&Notification],
    key_fn: impl Fn(&Notification) -> Option<String>,
) -> Vec<Vec<Uuid>> {
    let mut by_key: std::collections::HashMap<String, Vec<&Notification>> =
        std::collections::HashMap::new();
    for n in matched {
        if let Some(key) = key_fn(n) {
            by_key.entry(key).or_default().push(n);
        }
    }

    let mut keys: Vec<String> = by_key.keys().cloned().collect();
    keys.sort();

    let window = Duration::minutes(rule.window_minutes);
    let mut clusters = Vec::new();
    for key in keys {
        let items = &by_key[&key];
        let mut run: Vec<Uuid> = Vec::new();
        let mut last_time: Option<DateTime<Utc>> = None;
        for n in items {
            let continues_run = last_time
                .map(|t| n.created_at - t <= window)
                .unwrap_or(true);
            if !continues_run && !run.is_empty() {
                push_chunked(&mut clusters, &run, rule.max_group_size);
                run.clear();
            }
            run.push(n.id);
            last_time = Some(n.created_at);
        }
        if !run.is_empty() {
            push_chunked(&mut clusters, &run, rule.max_group_size);
        }
    }
    clusters
}

fn push_chunked(clusters: &mut Vec<Vec<Uuid>>, run: &[Uuid], max_size: usize) {
    for chunk in run.chunks(max_size.max(1)) {
        clusters.push(chunk.to_vec());
    }
}

/// Mark the cluster's members consumed and return them, oldest first
fn take_members(buffer: &mut [Buffered], cluster: &[Uuid]) -> Vec<Notification> {
    let mut members = Vec::new();
    for buffered in buffer.iter_mut() {
        if !buffered.consumed && cluster.contains(&buffered.notification.id) {
            buffered.consumed = true;
            members.push(buffered.notification.clone());
        }
    }
    members.sort_by_key(|n| n.created_at);
    members
}

/// Merge singleton groups of the same type into one digest each
fn merge_singleton_groups(
    user_id: Uuid,
    groups: Vec<NotificationGroup>,
    now: DateTime<Utc>,
) -> Vec<NotificationGroup> {
    let (singles, mut multi): (Vec<NotificationGroup>, Vec<NotificationGroup>) =
        groups.into_iter().partition(|g| g.notifications.len() == 1);

    let mut by_type: std::collections::HashMap<&'static str, Vec<NotificationGroup>> =
        std::collections::HashMap::new();
    for group in singles {
        by_type
            .entry(group.notifications[0].notification_type.as_str())
            .or_default()
            .push(group);
    }

    let mut type_keys: Vec<&'static str> = by_type.keys().copied().collect();
    type_keys.sort();
    for key in type_keys {
        let mut groups_of_type = by_type.remove(key).unwrap_or_default();
        if groups_of_type.len() >= 2 {
            let members: Vec<Notification> = groups_of_type
                .into_iter()
                .flat_map(|g| g.notifications)
                .collect();
            let summary = summarize(GroupingStrategy::ByType, &members);
            multi.push(NotificationGroup::new(
                user_id,
                members,
                GroupingStrategy::ByType,
                summary,
                now,
            ));
        } else {
            multi.append(&mut groups_of_type);
        }
    }
    multi
}

fn summarize(strategy: GroupingStrategy, members: &[Notification]) -> GroupSummary {
    let count = members.len();
    let mut categories: Vec<String> = members
        .iter()
        .filter_map(|n| n.custom_data.get("category").cloned())
        .collect();
    categories.sort();
    categories.dedup();
    let mut authors: Vec<String> = members
        .iter()
        .filter_map(|n| n.custom_data.get("author").cloned())
        .collect();
    authors.sort();
    authors.dedup();

    let (title, message) = match strategy {
        GroupingStrategy::ByType => {
            let type_name = members
                .first()
                .map(|n| n.notification_type.as_str())
                .unwrap_or("notification");
            (
                format!("{} {} updates", count, type_name.replace('_', " ")),
                format!("You have {} new updates", count),
            )
        }
        GroupingStrategy::ByCategory => {
            let category = categories.first().cloned().unwrap_or_default();
            (
                format!("{} stories in {}", count, category),
                format!("{} new stories in {}", count, category),
            )
        }
        GroupingStrategy::ByAuthor => {
            let author = authors.first().cloned().unwrap_or_default();
            (
                format!("{}: {} updates", author, count),
                format!("{} published {} new pieces", author, count),
            )
        }
        GroupingStrategy::ByTime => (
            format!("{} updates", count),
            format!("{} things happened while you were away", count),
        ),
        GroupingStrategy::Smart => {
            let breaking = members
                .iter()
                .find(|n| n.notification_type == NotificationType::BreakingNews);
            match breaking {
                Some(lead) => (
                    format!("{} (+{} more)", lead.title, count.saturating_sub(1)),
                    format!("{} and {} related updates", lead.title, count.saturating_sub(1)),
                ),
                None => (
                    format!("{} updates for you", count),
                    format!("{} new notifications bundled", count),
                ),
            }
        }
    };

    GroupSummary {
        title,
        message,
        count,
        categories,
        authors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationPriority;
    use chrono::TimeZone;

    fn social(user_id: Uuid, content_id: Uuid, title: &str, at: DateTime<Utc>) -> Notification {
        let mut n = Notification::new(
            user_id,
            NotificationType::SocialInteraction,
            NotificationPriority::Low,
            at,
        );
        n.title = title.to_string();
        n.message = title.to_string();
        n.content_id = Some(content_id);
        n
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_five_social_notifications_one_group() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let base = base_time();

        for i in 0..5 {
            aggregator.buffer_notification(&social(
                user_id,
                content_id,
                &format!("Reaction {}", i),
                base + Duration::minutes(i * 2),
            ));
        }

        let groups = aggregator.aggregate(user_id, base + Duration::minutes(10));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].notifications.len(), 5);
        assert_eq!(groups[0].summary.count, 5);
        assert!(!groups[0].summary.title.is_empty());
    }

    #[test]
    fn test_aggregation_idempotent_over_consumed_buffer() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let base = base_time();

        for i in 0..3 {
            aggregator.buffer_notification(&social(
                user_id,
                content_id,
                &format!("Reaction {}", i),
                base + Duration::minutes(i),
            ));
        }

        let first = aggregator.aggregate(user_id, base + Duration::minutes(5));
        assert!(!first.is_empty());

        let second = aggregator.aggregate(user_id, base + Duration::minutes(6));
        assert!(second.is_empty(), "consumed members must not regroup");
    }

    #[test]
    fn test_breaking_news_clusters_by_category() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let base = base_time();

        for i in 0..3 {
            let mut n = Notification::new(
                user_id,
                NotificationType::BreakingNews,
                NotificationPriority::High,
                base + Duration::minutes(i),
            );
            n.title = format!("Storm update {}", i);
            n.custom_data
                .insert("category".to_string(), "weather".to_string());
            aggregator.buffer_notification(&n);
        }

        let groups = aggregator.aggregate(user_id, base + Duration::minutes(5));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].notifications.len(), 3);
        assert_eq!(groups[0].strategy, GroupingStrategy::Smart);
        assert!(groups[0].summary.title.contains("Storm update"));
        assert_eq!(groups[0].priority, NotificationPriority::High);
    }

    #[test]
    fn test_similar_recommendations_cluster() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let base = base_time();

        let titles = [
            "Rust async patterns deep dive",
            "Rust async patterns explained",
            "Gardening tips for spring",
        ];
        for (i, title) in titles.iter().enumerate() {
            let mut n = Notification::new(
                user_id,
                NotificationType::Recommendation,
                NotificationPriority::Low,
                base + Duration::minutes(i as i64),
            );
            n.title = title.to_string();
            n.content_id = Some(Uuid::new_v4());
            aggregator.buffer_notification(&n);
        }

        let groups = aggregator.aggregate(user_id, base + Duration::minutes(5));
        // One similarity cluster of 2 and one singleton
        let sizes: Vec<usize> = groups.iter().map(|g| g.notifications.len()).collect();
        assert!(sizes.contains(&2), "sizes were {:?}", sizes);
        assert_eq!(sizes.iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_try_group_candidate_leaves_unmatched_buffered() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let content_id = Uuid::new_v4();
        let base = base_time();

        let first = social(user_id, content_id, "First reaction", base);
        assert!(aggregator.try_group_candidate(&first, base).is_none());
        assert_eq!(aggregator.pending_count(user_id), 1);

        // Second on the same content merges with the buffered first
        let second = social(
            user_id,
            content_id,
            "Second reaction",
            base + Duration::minutes(1),
        );
        let group = aggregator
            .try_group_candidate(&second, base + Duration::minutes(1))
            .expect("should merge with the pending notification");
        assert_eq!(group.notifications.len(), 2);
        assert_eq!(aggregator.pending_count(user_id), 0);
    }

    #[test]
    fn test_singleton_groups_of_same_type_merge() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let base = base_time();

        // Two unrelated recommendations: no similarity cluster, but the
        // final pass merges the two singletons
        let titles = ["Chess openings guide", "Coastal hiking routes"];
        for (i, title) in titles.iter().enumerate() {
            let mut n = Notification::new(
                user_id,
                NotificationType::Recommendation,
                NotificationPriority::Low,
                base + Duration::minutes(i as i64),
            );
            n.title = title.to_string();
            n.content_id = Some(Uuid::new_v4());
            aggregator.buffer_notification(&n);
        }

        let groups = aggregator.aggregate(user_id, base + Duration::minutes(5));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].notifications.len(), 2);
        assert_eq!(groups[0].strategy, GroupingStrategy::ByType);
    }

    #[test]
    fn test_groups_sorted_by_priority() {
        let aggregator = Aggregator::default();
        let user_id = Uuid::new_v4();
        let base = base_time();

        // Low-priority social pile
        let content_id = Uuid::new_v4();
        for i in 0..2 {
            aggregator.buffer_notification(&social(
                user_id,
                content_id,
                &format!("Reaction {}", i),
                base + Duration::minutes(i),
            ));
        }
        // High-priority breaking pair
        for i in 0..2 {
            let mut n = Notification::new(
                user_id,
                NotificationType::BreakingNews,
                NotificationPriority::Critical,
                base + Duration::minutes(i),
            );
            n.title = format!("Grid failure update {}", i);
            n.custom_data
                .insert("category".to_string(), "infrastructure".to_string());
            aggregator.buffer_notification(&n);
        }

        let groups = aggregator.aggregate(user_id, base + Duration::minutes(5));
        assert!(groups.len() >= 2);
        assert_eq!(groups[0].priority, NotificationPriority::Critical);
    }
}
