// ============================================
// Delivery Decisioning
// ============================================
//
// The decision side of the engine: rule-driven rate limiting and
// anti-duplication, digest aggregation, the scheduled-dispatch queue,
// and the orchestrating pipeline. Rule tables are data evaluated by a
// shared predicate layer so policy stays configuration-driven.

pub mod aggregator;
pub mod dedup;
pub mod pipeline;
pub mod rate_limiter;
pub mod rules;
pub mod scheduler;

pub use aggregator::{AggregationRule, Aggregator, AggregatorConfig};
pub use dedup::{AntiDuplicationEngine, DedupCheck, DedupConfig, DedupRule, DedupStrategy};
pub use pipeline::{NotificationEngine, SendOutcome};
pub use rate_limiter::{
    RateDecision, RateLimitException, RateLimitRule, RateLimiter, RateLimiterConfig, RuleScope,
    WindowCaps,
};
pub use rules::{FieldOp, RuleCondition};
pub use scheduler::DeliveryScheduler;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("store error: {0}")]
    Store(#[from] crate::stores::StoreError),

    #[error("model error: {0}")]
    Model(#[from] crate::models::ModelError),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
