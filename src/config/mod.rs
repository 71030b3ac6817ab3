use serde::{Deserialize, Serialize};

/// Engine-wide configuration knobs, overridable from the environment.
/// Component-level tunables (decay rates, rule tables, score weights) live
/// in the per-component `…Config` structs next to each service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub events: EventConfig,
    pub limits: LimitConfig,
    pub retention: RetentionConfig,
    #[cfg(feature = "redis-store")]
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Bounded per-user raw event buffer size
    pub buffer_size: usize,
    /// Minutes of inactivity before a live session is marked idle
    pub session_idle_minutes: i64,
    /// Hours after which idle realtime state is evicted
    pub state_evict_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Seed for the per-user adaptive hourly limit
    pub default_hourly_limit: u32,
    /// Adaptive limit floor / ceiling
    pub adaptive_floor: u32,
    pub adaptive_ceiling: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Rate-limit history retention in hours
    pub rate_history_hours: i64,
    /// Dedup hash record TTL in days
    pub dedup_ttl_days: i64,
    /// Aggregation buffer retention in hours
    pub aggregation_buffer_hours: i64,
}

#[cfg(feature = "redis-store")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Profile cache TTL in seconds
    pub profile_ttl_secs: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        Ok(EngineConfig {
            events: EventConfig {
                buffer_size: std::env::var("EVENT_BUFFER_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                session_idle_minutes: std::env::var("SESSION_IDLE_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                state_evict_hours: std::env::var("STATE_EVICT_HOURS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
            },
            limits: LimitConfig {
                default_hourly_limit: std::env::var("DEFAULT_HOURLY_LIMIT")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                adaptive_floor: std::env::var("ADAPTIVE_LIMIT_FLOOR")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                adaptive_ceiling: std::env::var("ADAPTIVE_LIMIT_CEILING")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
            retention: RetentionConfig {
                rate_history_hours: std::env::var("RATE_HISTORY_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()?,
                dedup_ttl_days: std::env::var("DEDUP_TTL_DAYS")
                    .unwrap_or_else(|_| "7".to_string())
                    .parse()?,
                aggregation_buffer_hours: std::env::var("AGGREGATION_BUFFER_HOURS")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
            },
            #[cfg(feature = "redis-store")]
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                profile_ttl_secs: std::env::var("REDIS_PROFILE_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()?,
            },
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            events: EventConfig {
                buffer_size: 100,
                session_idle_minutes: 30,
                state_evict_hours: 2,
            },
            limits: LimitConfig {
                default_hourly_limit: 30,
                adaptive_floor: 5,
                adaptive_ceiling: 60,
            },
            retention: RetentionConfig {
                rate_history_hours: 24,
                dedup_ttl_days: 7,
                aggregation_buffer_hours: 4,
            },
            #[cfg(feature = "redis-store")]
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                profile_ttl_secs: 86400,
            },
        }
    }
}
