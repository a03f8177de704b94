//! Push-distribution channel. At-most-once from the caller's perspective;
//! delivery retries live in the broadcaster, not here.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::Serialize;

use crate::error::Result;

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &str) -> Result<()>;
}

#[derive(Serialize)]
struct PushEnvelope<'a> {
    event: &'a str,
    data: &'a str,
}

/// Publishes to redis pub/sub topics. Consumers subscribe per channel and
/// unwrap the `{event, data}` envelope.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PushChannel for RedisPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &str) -> Result<()> {
        let message = serde_json::to_string(&PushEnvelope { event, data: payload })?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }
}
