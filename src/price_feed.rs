//! Currency feed: refreshes spot prices and the GAS exchange rate applied to
//! every synthetic volume. A failed tick keeps the previous rate in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::warn;

use crate::cache::{keys, Cache};
use crate::config::{CURRENCY_API_URL, PRICE_FEED_INTERVAL_SECS, UPSTREAM_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::state::PipelineState;
use crate::types::{Currency, PriceData};

pub struct PriceFeed {
    http: reqwest::Client,
    cache: Cache,
    state: Arc<PipelineState>,
}

impl PriceFeed {
    pub fn new(cache: Cache, state: Arc<PipelineState>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, cache, state })
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(PRICE_FEED_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("Price feed tick failed, keeping previous rate: {e}");
            }
        }
    }

    pub async fn run_once(&self) -> Result<()> {
        let currency_data: HashMap<String, Currency> = self
            .http
            .get(CURRENCY_API_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let exchange_rate = gas_exchange_rate(&currency_data)?;
        let price = PriceData { currency_data, exchange_rate };

        self.state.set_price_data(price.clone()).await;
        self.cache.set(keys::PRICE_DATA, &price).await
    }
}

/// Volumes are denominated in GAS, so the multiplier is the inverse of the
/// GAS/USD spot price.
pub fn gas_exchange_rate(currency_data: &HashMap<String, Currency>) -> Result<f64> {
    let usd = currency_data
        .get("GAS")
        .and_then(|c| c.get("USD"))
        .copied()
        .ok_or_else(|| AppError::Upstream("currency response missing GAS/USD".to_string()))?;
    if usd <= 0.0 {
        return Err(AppError::Upstream(format!("non-positive GAS/USD price: {usd}")));
    }
    Ok(1.0 / usd)
}
