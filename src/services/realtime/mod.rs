// ============================================
// Realtime Behavior Processing
// ============================================
//
// Per-event hot path: session reading analysis and live per-user state
// with anomaly detection. Everything here is in-process and sharded by
// user; nothing blocks delivery decisions.

pub mod reading_analyzer;
pub mod state_processor;

pub use reading_analyzer::{
    ReadingAnalyzer, ReadingAnalyzerConfig, ReadingIntent, ReadingSession, ScrollPattern,
};
pub use state_processor::{
    AnomalyKind, EngagementLevel, RealtimeConfig, RealtimeProcessor, RealtimeUpdate,
    RecommendedAction,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
