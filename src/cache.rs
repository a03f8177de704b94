//! Named-blob cache on redis — the single source of truth between pipeline
//! stages. Values are JSON, last-writer-wins, no TTL.

use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Cache row names. No cross-row atomicity is provided; readers tolerate a
/// partially updated set within one refresh.
pub mod keys {
    pub const ALL_MATCHES: &str = "all-matches";
    pub const SPORT_MATCHES: &str = "sport-matches";
    pub const COMPETITION_MATCHES: &str = "competition-matches";
    pub const COMPETITION_DETAIL: &str = "competition-detail";
    pub const COMPETITION_AMOUNTS: &str = "competition-amounts";
    pub const NAVIGATION: &str = "navigation";
    pub const SPORT_KEYS: &str = "sport-keys";
    pub const PRICE_DATA: &str = "price-data";
    pub const CHAIN_DATA: &str = "chain-data";
}

#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut conn = self.conn.clone();
        let raw: Vec<u8> = conn.get(key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, payload).await?;
        Ok(())
    }
}
