// ============================================
// User Profile Builder
// ============================================
//
// Builds the learned per-user profile from raw behavior:
// 1. BehaviorAggregator - long-term pattern classification and churn risk
// 2. InterestProfileBuilder - decaying normalized interest weights,
//    activity histograms, sentiment and evolution analysis
//
// Both stages are pure over event slices; persistence goes through the
// ProfileStore contract.

pub mod behavior_aggregator;
pub mod interest_builder;

pub use behavior_aggregator::{
    ActivityLevel, BehaviorAggregator, BehaviorAggregatorConfig, BehaviorSummary,
    DetectedPattern, EngagementTrend, PrimaryPattern, SubPattern,
};
pub use interest_builder::{InterestBuilderConfig, InterestProfileBuilder};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileBuilderError {
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ProfileBuilderError>;
