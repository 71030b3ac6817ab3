// ============================================
// Predictive Scoring
// ============================================
//
// Closed-form predictors over (profile, content, context):
// 1. EngagementScorer - 7-component weighted engagement score with
//    per-user weight personalization
// 2. TimingPredictor - best delivery slot over the next 24 hours
//
// Both degrade to documented defaults when the profile is thin.

pub mod engagement_scorer;
pub mod timing_predictor;

pub use engagement_scorer::{
    EngagementScore, EngagementScorer, Recommendation, ScoreWeights, ScorerConfig, ScoringContext,
};
pub use timing_predictor::{
    DeviceKind, TimingConfig, TimingContext, TimingPrediction, TimingPredictor,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ScoringError>;
