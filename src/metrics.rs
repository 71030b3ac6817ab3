use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

static EVENTS_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_engine_events_ingested_total",
            "Behavior events ingested by the engine",
        ),
        &["event_type"],
    )
    .expect("failed to create notification_engine_events_ingested_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_engine_events_ingested_total");
    counter
});

static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_engine_decisions_total",
            "Pipeline decisions by terminal outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create notification_engine_decisions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_engine_decisions_total");
    counter
});

static ANOMALIES_FLAGGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "notification_engine_anomalies_flagged_total",
        "Soft anomaly flags raised by the realtime processor",
    )
    .expect("failed to create notification_engine_anomalies_flagged_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_engine_anomalies_flagged_total");
    counter
});

pub fn observe_event(event_type: &str) {
    EVENTS_INGESTED_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn observe_decision(outcome: &str) {
    DECISIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_anomaly() {
    ANOMALIES_FLAGGED_TOTAL.inc();
}
