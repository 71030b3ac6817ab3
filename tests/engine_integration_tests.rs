/// Integration tests for the notification engine
///
/// Covers the end-to-end decision pipeline over the in-memory stores:
/// - Profile learning from tracked behavior events
/// - Duplicate and rate-limit blocks as terminal decisions
/// - Digest aggregation and scheduled re-entry
/// - Anomaly flags staying non-blocking
use chrono::{Duration, Utc};
use notification_engine::models::*;
use notification_engine::services::delivery::pipeline::{CreateRequest, TrackBehaviorRequest};
use notification_engine::stores::{
    InMemoryContentStore, InMemoryProfileStore, InMemoryTemplateStore, ProfileStore,
    StubChannelProvider,
};
use notification_engine::{NotificationEngine, SendOutcome};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    engine: NotificationEngine,
    profiles: Arc<InMemoryProfileStore>,
    contents: Arc<InMemoryContentStore>,
    provider: Arc<StubChannelProvider>,
}

fn harness() -> Harness {
    let profiles = Arc::new(InMemoryProfileStore::new());
    let contents = Arc::new(InMemoryContentStore::new());
    let provider = Arc::new(StubChannelProvider::new());
    let engine = NotificationEngine::new(
        profiles.clone(),
        contents.clone(),
        Arc::new(InMemoryTemplateStore::new()),
        provider.clone(),
    );
    Harness {
        engine,
        profiles,
        contents,
        provider,
    }
}

fn content(category: &str, title: &str) -> ContentItem {
    ContentItem {
        id: Uuid::new_v4(),
        title: title.to_string(),
        category: category.to_string(),
        entities: vec![],
        tags: vec![],
        sentiment_score: 0.4,
        quality_score: 0.8,
        publish_time: Utc::now() - Duration::minutes(30),
        author: "newsdesk".to_string(),
        engagement: ContentEngagement {
            views: 2000,
            likes: 150,
            shares: 40,
            comments: 12,
            completion_rate: 0.55,
            avg_time_spent_secs: 80.0,
            urgency_score: 0.2,
        },
    }
}

fn track(user_id: Uuid, event_type: EventType, content_id: Option<Uuid>, minutes_ago: i64) -> TrackBehaviorRequest {
    TrackBehaviorRequest {
        user_id,
        session_id: format!("session-{}", minutes_ago / 60),
        event_type,
        content_id,
        metadata: EventMetadata::default(),
        timestamp: Some(Utc::now() - Duration::minutes(minutes_ago)),
        device: None,
    }
}

async fn disable_grouping(profiles: &InMemoryProfileStore, user_id: Uuid) {
    let mut profile = UserProfile::new(user_id, Utc::now());
    profile.notification_preferences.allow_grouping = false;
    profiles.save(&profile).await.unwrap();
}

#[tokio::test]
async fn test_profile_learns_from_tracked_events() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let tech = content("technology", "Chip supply update");
    let sports = content("sports", "Cup final recap");
    h.contents.insert(tech.clone());
    h.contents.insert(sports.clone());

    // 40 events triggers two profile rebuild cycles
    for i in 0..40 {
        let (event_type, content_id) = if i % 4 == 0 {
            (EventType::ReadComplete, Some(tech.id))
        } else if i % 4 == 1 {
            (EventType::Like, Some(tech.id))
        } else if i % 4 == 2 {
            (EventType::ReadComplete, Some(sports.id))
        } else {
            (EventType::PageView, None)
        };
        h.engine
            .track_behavior(track(user_id, event_type, content_id, 60 * 24 - i))
            .await
            .unwrap();
    }

    let profile = h.profiles.load(user_id).await.unwrap().unwrap();
    assert_eq!(profile.engagement_history.len(), 40);
    assert!(!profile.interests.is_empty());

    let sum: f64 = profile.interests.values().sum();
    assert!((sum - 1.0).abs() < 1e-6, "interest weights sum to {}", sum);
    for (name, weight) in &profile.interests {
        assert!(*weight >= 0.1 - 1e-9, "{} below floor at {}", name, weight);
    }
    assert!(profile.interests.contains_key("technology"));
}

#[tokio::test]
async fn test_exact_duplicate_blocked_on_second_send() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    let item = content("technology", "Chip supply update");
    h.contents.insert(item.clone());

    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.content_id = Some(item.id);
    request.priority = Some(NotificationPriority::Critical);
    request
        .custom_data
        .insert("title".to_string(), "Chip supply update".to_string());

    match h.engine.create_and_send(request.clone()).await.unwrap() {
        SendOutcome::Sent { .. } => {}
        other => panic!("first send should pass, got {:?}", other),
    }

    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Blocked { reason, .. } => {
            assert!(reason.contains("exact_match"), "reason was {}", reason);
        }
        other => panic!("second send should be blocked, got {:?}", other),
    }
}

#[tokio::test]
async fn test_breaking_news_repeat_blocked_by_time_rule() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    let item = content("news", "Port strike begins");
    h.contents.insert(item.clone());

    let mut first = CreateRequest::new(user_id, NotificationType::BreakingNews);
    first.content_id = Some(item.id);
    match h.engine.create_and_send(first).await.unwrap() {
        SendOutcome::Sent { notification } => {
            assert_eq!(notification.priority, NotificationPriority::High);
        }
        other => panic!("first breaking send should pass, got {:?}", other),
    }

    let mut second = CreateRequest::new(user_id, NotificationType::BreakingNews);
    second.content_id = Some(item.id);
    second
        .custom_data
        .insert("title".to_string(), "Port strike update".to_string());
    match h.engine.create_and_send(second).await.unwrap() {
        SendOutcome::Blocked { reason, .. } => {
            assert!(reason.contains("time_based"), "reason was {}", reason);
        }
        other => panic!("repeat breaking should be blocked, got {:?}", other),
    }
}

#[tokio::test]
async fn test_per_minute_rate_limit_blocks_with_retry_hint() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    for i in 0..5 {
        let mut request = CreateRequest::new(user_id, NotificationType::System);
        request
            .custom_data
            .insert("title".to_string(), format!("Alert {}", i));
        match h.engine.create_and_send(request).await.unwrap() {
            SendOutcome::Sent { .. } => {}
            other => panic!("send {} should pass, got {:?}", i, other),
        }
    }

    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request
        .custom_data
        .insert("title".to_string(), "Alert 5".to_string());
    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Blocked {
            reason,
            retry_after_secs,
            notification,
        } => {
            assert!(reason.contains("rate rule"), "reason was {}", reason);
            assert!(retry_after_secs.unwrap() > 0);
            assert_eq!(notification.status, NotificationStatus::Blocked);
        }
        other => panic!("sixth rapid send should be rate limited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_social_interactions_merge_into_digest() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let item = content("community", "Thread of the day");
    h.contents.insert(item.clone());

    let mut first = CreateRequest::new(user_id, NotificationType::SocialInteraction);
    first.content_id = Some(item.id);
    first.custom_data.insert("author".to_string(), "alex".to_string());
    first.custom_data.insert("action".to_string(), "liked your post".to_string());
    match h.engine.create_and_send(first).await.unwrap() {
        SendOutcome::Sent { .. } => {}
        other => panic!("first social send should pass, got {:?}", other),
    }

    let mut second = CreateRequest::new(user_id, NotificationType::SocialInteraction);
    second.content_id = Some(item.id);
    second.custom_data.insert("author".to_string(), "sam".to_string());
    second
        .custom_data
        .insert("action".to_string(), "commented on your post".to_string());
    match h.engine.create_and_send(second).await.unwrap() {
        SendOutcome::Aggregated { group } => {
            assert_eq!(group.notifications.len(), 2);
            assert_eq!(group.summary.count, 2);
            assert!(!group.summary.title.is_empty());
        }
        other => panic!("second social send should aggregate, got {:?}", other),
    }

    // Individual first send plus the digest itself
    assert_eq!(h.provider.delivered().len(), 2);
}

#[tokio::test]
async fn test_scheduled_notification_reenters_and_sends() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request
        .custom_data
        .insert("title".to_string(), "Digest preview".to_string());
    request.scheduled_time = Some(Utc::now() + Duration::hours(2));

    let scheduled_id = match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Scheduled { notification, due_at } => {
            assert_eq!(notification.status, NotificationStatus::Scheduled);
            assert!(due_at > Utc::now());
            notification.id
        }
        other => panic!("expected scheduling, got {:?}", other),
    };
    assert_eq!(h.engine.scheduler.pending_len(), 1);

    // Nothing due yet
    assert!(h.engine.process_due(Utc::now()).await.is_empty());

    // At trigger time the pipeline restarts from the rate limiter and sends
    let outcomes = h.engine.process_due(Utc::now() + Duration::hours(3)).await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        SendOutcome::Sent { notification } => {
            assert_eq!(notification.id, scheduled_id);
            assert_eq!(notification.status, NotificationStatus::Sent);
        }
        other => panic!("due notification should send, got {:?}", other),
    }
    assert_eq!(h.engine.scheduler.pending_len(), 0);
}

#[tokio::test]
async fn test_cancelled_schedule_never_fires() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.scheduled_time = Some(Utc::now() + Duration::hours(2));
    let notification_id = match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Scheduled { notification, .. } => notification.id,
        other => panic!("expected scheduling, got {:?}", other),
    };

    h.engine.cancel_scheduled(notification_id);
    h.engine.cancel_scheduled(notification_id); // idempotent

    let outcomes = h.engine.process_due(Utc::now() + Duration::hours(3)).await;
    assert!(outcomes.is_empty());
    assert_eq!(h.provider.delivered().len(), 0);
}

#[tokio::test]
async fn test_anomalous_events_never_block_delivery() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    // A click flood trips several anomaly flags
    let mut flagged = false;
    for i in 0..12 {
        let mut request = track(user_id, EventType::Click, None, 0);
        request.timestamp = Some(Utc::now() - Duration::milliseconds(1200 - i * 100));
        let update = h.engine.track_behavior(request).await.unwrap();
        flagged = flagged || update.flagged_for_review;
    }
    assert!(flagged, "anomaly threshold should have been crossed");

    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.priority = Some(NotificationPriority::Critical);
    request
        .custom_data
        .insert("title".to_string(), "Security notice".to_string());
    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Sent { .. } => {}
        other => panic!("anomalies must not block delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_channel_preferences_intersect_requested_channels() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let mut profile = UserProfile::new(user_id, Utc::now());
    profile.notification_preferences.enabled_channels = vec![NotificationChannel::Push];
    profile.notification_preferences.allow_grouping = false;
    h.profiles.save(&profile).await.unwrap();

    // Only a disabled channel requested: terminal block
    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.priority = Some(NotificationPriority::Critical);
    request.channels = Some(vec![NotificationChannel::Email]);
    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Blocked { reason, .. } => {
            assert!(reason.contains("no enabled channel"));
        }
        other => panic!("expected channel block, got {:?}", other),
    }

    // Mixed request narrows to the enabled channel
    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.priority = Some(NotificationPriority::Critical);
    request.channels = Some(vec![NotificationChannel::Email, NotificationChannel::Push]);
    request
        .custom_data
        .insert("title".to_string(), "Account notice".to_string());
    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Sent { notification } => {
            assert_eq!(notification.channels, vec![NotificationChannel::Push]);
            assert_eq!(notification.delivery_results.len(), 1);
        }
        other => panic!("expected send on push, got {:?}", other),
    }
}

#[tokio::test]
async fn test_erasure_resets_learning_and_blocks_nothing() {
    let h = harness();
    let user_id = Uuid::new_v4();
    disable_grouping(&h.profiles, user_id).await;

    let item = content("technology", "Chip supply update");
    h.contents.insert(item.clone());
    for i in 0..10 {
        h.engine
            .track_behavior(track(user_id, EventType::ReadComplete, Some(item.id), 60 - i))
            .await
            .unwrap();
    }
    assert!(h.profiles.load(user_id).await.unwrap().is_some());

    h.engine.erase_user(user_id).await.unwrap();
    assert!(h.profiles.load(user_id).await.unwrap().is_none());

    // A fresh send works immediately after erasure
    let mut request = CreateRequest::new(user_id, NotificationType::System);
    request.priority = Some(NotificationPriority::Critical);
    request
        .custom_data
        .insert("title".to_string(), "Welcome back".to_string());
    match h.engine.create_and_send(request).await.unwrap() {
        SendOutcome::Sent { .. } => {}
        other => panic!("send after erasure should pass, got {:?}", other),
    }
}

#[test]
fn test_score_vector_serialization_round_trip() {
    let vector = ScoreVector {
        relevance: 0.8,
        timing: 0.7,
        user_activity: 0.5,
        quality: 0.9,
        social: 0.3,
        sentiment: 0.4,
        novelty: 0.2,
        total: 0.65,
    };
    let json = serde_json::to_string(&vector).unwrap();
    let back: ScoreVector = serde_json::from_str(&json).unwrap();
    assert_eq!(vector, back);
}
