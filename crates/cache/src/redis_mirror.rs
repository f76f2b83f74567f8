//! Best-effort write-through mirror onto Redis, grounded on the same
//! `redis` crate a couple of the reference trading stacks use for their own
//! shared caches. A mirror write failure is logged and swallowed — the
//! in-memory cache remains correct either way.

use redis::AsyncCommands;
use tracing::warn;

#[derive(Clone)]
pub struct RedisMirror {
    client: redis::Client,
}

impl RedisMirror {
    pub fn connect(url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) {
        let result: redis::RedisResult<()> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.set_ex(key, value, ttl_secs).await
        }
        .await;
        if let Err(err) = result {
            warn!(%err, key, "redis mirror write failed, continuing with in-memory cache only");
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let result: redis::RedisResult<Option<String>> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.get(key).await
        }
        .await;
        match result {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, key, "redis mirror read failed, falling back to no warm state");
                None
            }
        }
    }
}
