// ============================================
// Redis-Backed Stores
// ============================================
//
// Distributed alternatives to the in-memory stores for multi-instance
// deployments: a profile cache (JSON values with TTL) and a dedup record
// store (SETNX with TTL, fail-open on backend errors).
//
// Redis keys:
// - profile:{user_id} - Cached user profile
// - dedup:{user_id}:{hash} - Dedup hash record

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use super::{ProfileStore, Result, StoreError};
use crate::models::UserProfile;

pub struct RedisProfileStore {
    redis: redis::Client,
    ttl_secs: u64,
    key_prefix: String,
}

impl RedisProfileStore {
    pub fn new(redis: redis::Client, ttl_secs: u64) -> Self {
        Self {
            redis,
            ttl_secs,
            key_prefix: "profile".to_string(),
        }
    }

    fn profile_key(&self, user_id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl ProfileStore for RedisProfileStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let json: Option<String> = conn
            .get(self.profile_key(user_id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match json {
            Some(json) => {
                let profile = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let json = serde_json::to_string(profile)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let _: () = conn
            .set_ex(self.profile_key(profile.user_id), json, self.ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let _: () = conn
            .del(self.profile_key(user_id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

/// Distributed dedup record store. `try_record` atomically claims a hash
/// key and reports whether it already existed; backend errors fail open
/// so a Redis outage never blocks delivery on its own.
pub struct RedisDedupStore {
    redis: redis::Client,
    ttl_secs: u64,
}

impl RedisDedupStore {
    pub fn new(redis: redis::Client, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn dedup_key(user_id: Uuid, hash: &str) -> String {
        format!("dedup:{}:{}", user_id, hash)
    }

    /// Returns true if the hash was already recorded (duplicate),
    /// false if this call claimed it.
    pub async fn try_record(&self, user_id: Uuid, hash: &str) -> bool {
        let key = Self::dedup_key(user_id, hash);

        let result: std::result::Result<bool, redis::RedisError> = async {
            let mut conn = self.redis.get_multiplexed_async_connection().await?;
            let was_set: bool = conn.set_nx(&key, "1").await?;
            if was_set {
                let _: () = conn.expire(&key, self.ttl_secs as i64).await?;
            }
            Ok(was_set)
        }
        .await;

        match result {
            Ok(was_set) => !was_set,
            Err(e) => {
                warn!("redis dedup check failed for {}: {} - allowing", key, e);
                false
            }
        }
    }
}
