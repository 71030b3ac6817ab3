pub mod config;
pub mod metrics;
pub mod models;
pub mod services;
pub mod stores;

pub use config::EngineConfig;
pub use services::delivery::pipeline::{NotificationEngine, SendOutcome};
pub use services::realtime::RealtimeProcessor;
