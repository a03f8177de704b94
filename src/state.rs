//! Process-wide pipeline state, owned by the scheduler and shared into jobs.
//!
//! Exactly two mutual-exclusion domains exist: the chain state (heartbeat
//! only) and the per-run ingestion aggregates (see `ingest`). Price details
//! and sport keys are read-mostly snapshots behind an RwLock.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::chain::ChainState;
use crate::types::{PriceData, SportKey};

pub struct PipelineState {
    pub chain: Mutex<ChainState>,
    price: RwLock<PriceData>,
    sport_keys: RwLock<Vec<SportKey>>,
}

impl PipelineState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chain: Mutex::new(ChainState::new()),
            price: RwLock::new(PriceData::default()),
            sport_keys: RwLock::new(Vec::new()),
        })
    }

    pub async fn set_price_data(&self, data: PriceData) {
        *self.price.write().await = data;
    }

    pub async fn price_data(&self) -> PriceData {
        self.price.read().await.clone()
    }

    /// GAS→fiat rate applied to synthetic volumes. Zero until the first
    /// successful price-feed tick, which runs before ingestion at startup.
    pub async fn exchange_rate(&self) -> f64 {
        self.price.read().await.exchange_rate
    }

    pub async fn set_sport_keys(&self, keys: Vec<SportKey>) {
        *self.sport_keys.write().await = keys;
    }

    pub async fn sport_keys(&self) -> Vec<SportKey> {
        self.sport_keys.read().await.clone()
    }
}
