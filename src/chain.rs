//! Chain heartbeat: polls block height, keeps a running average inter-block
//! time, triggers a broadcast cycle on every height advance, and asks the node
//! client to fail over after too many stagnant polls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::cache::{keys, Cache};
use crate::config::{HEARTBEAT_INTERVAL_SECS, NODE_STAGNANT_THRESHOLD, UPSTREAM_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::ChainSummary;

#[async_trait]
pub trait HeightProvider: Send + Sync {
    async fn block_height(&self) -> Result<i64>;
    /// Side-effecting failover to an alternate upstream node.
    async fn select_best_node(&self);
}

// ---------------------------------------------------------------------------
// ChainState
// ---------------------------------------------------------------------------

/// Mutated only by the heartbeat job, under its own critical section.
#[derive(Debug)]
pub struct ChainState {
    pub height: i64,
    pub updated_at: i64,
    blocks_counted: i64,
    time_counted: f64,
    pub average_time: f64,
    stagnant_polls: u64,
}

#[derive(Debug)]
pub enum PollOutcome {
    /// Height advanced; persist and broadcast this summary.
    Advanced(ChainSummary),
    Hold,
    /// Stagnation threshold crossed; counter has been reset.
    FailOver,
}

impl ChainState {
    pub fn new() -> Self {
        Self {
            height: 0,
            updated_at: now_secs(),
            blocks_counted: 0,
            time_counted: 0.0,
            average_time: 0.0,
            stagnant_polls: 0,
        }
    }

    /// Fold one poll result into the state. Height is monotone non-decreasing;
    /// a failed poll or unchanged height counts toward stagnation.
    pub fn observe(&mut self, polled: Option<i64>, now_secs: i64, threshold: u64) -> PollOutcome {
        match polled {
            Some(height) if height > self.height => {
                self.time_counted += (now_secs - self.updated_at).max(0) as f64;
                self.blocks_counted += 1;
                self.average_time = self.time_counted / self.blocks_counted as f64;
                self.height = height;
                self.updated_at = now_secs;
                self.stagnant_polls = 0;
                PollOutcome::Advanced(ChainSummary {
                    block_height: height,
                    average_time: self.average_time,
                    updated_at: now_secs,
                })
            }
            _ => {
                self.stagnant_polls += 1;
                if self.stagnant_polls > threshold {
                    self.stagnant_polls = 0;
                    PollOutcome::FailOver
                } else {
                    PollOutcome::Hold
                }
            }
        }
    }
}

/// One heartbeat step: poll, fold into state, run any side effect. The state
/// lock is never held across the poll or the failover call.
pub async fn poll_once<P: HeightProvider + ?Sized>(
    provider: &P,
    chain: &Mutex<ChainState>,
    now_secs: i64,
    threshold: u64,
) -> Option<ChainSummary> {
    let polled = match provider.block_height().await {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("Height poll failed: {e}");
            None
        }
    };

    let outcome = chain.lock().await.observe(polled, now_secs, threshold);
    match outcome {
        PollOutcome::Advanced(summary) => Some(summary),
        PollOutcome::Hold => None,
        PollOutcome::FailOver => {
            warn!("Chain stagnant past threshold, reselecting node");
            provider.select_best_node().await;
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat job
// ---------------------------------------------------------------------------

pub struct Heartbeat {
    provider: Arc<dyn HeightProvider>,
    chain: Arc<crate::state::PipelineState>,
    cache: Cache,
    broadcaster: Arc<Broadcaster>,
}

impl Heartbeat {
    pub fn new(
        provider: Arc<dyn HeightProvider>,
        chain: Arc<crate::state::PipelineState>,
        cache: Cache,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self { provider, chain, cache, broadcaster }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let summary = poll_once(
                self.provider.as_ref(),
                &self.chain.chain,
                now_secs(),
                NODE_STAGNANT_THRESHOLD,
            )
            .await;

            if let Some(summary) = summary {
                if let Err(e) = self.cache.set(keys::CHAIN_DATA, &summary).await {
                    error!("Unable to persist chain data: {e}");
                    continue;
                }
                self.broadcaster.run_cycle(&summary).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NodeClient
// ---------------------------------------------------------------------------

/// JSON-RPC client over a fixed node list. `select_best_node` probes every
/// node and switches to the one reporting the greatest height.
pub struct NodeClient {
    http: reqwest::Client,
    nodes: Vec<String>,
    active: AtomicUsize,
}

impl NodeClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(AppError::Config("node list is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, nodes, active: AtomicUsize::new(0) })
    }

    async fn probe(&self, node: &str) -> Option<i64> {
        let body = json!({"jsonrpc": "2.0", "method": "getblockcount", "params": [], "id": 1});
        let resp: Value = self.http.post(node).json(&body).send().await.ok()?.json().await.ok()?;
        resp.get("result").and_then(Value::as_i64)
    }
}

#[async_trait]
impl HeightProvider for NodeClient {
    async fn block_height(&self) -> Result<i64> {
        let node = &self.nodes[self.active.load(Ordering::Relaxed) % self.nodes.len()];
        let body = json!({"jsonrpc": "2.0", "method": "getblockcount", "params": [], "id": 1});
        let resp: Value = self.http.post(node).json(&body).send().await?.json().await?;
        resp.get("result")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::Chain(format!("no result field from {node}")))
    }

    async fn select_best_node(&self) {
        let probes = self.nodes.iter().enumerate().map(|(i, node)| async move {
            (i, self.probe(node).await)
        });
        let results = futures_util::future::join_all(probes).await;

        let best = results
            .into_iter()
            .filter_map(|(i, height)| height.map(|h| (i, h)))
            .max_by_key(|&(_, h)| h);

        match best {
            Some((index, height)) => {
                self.active.store(index, Ordering::Relaxed);
                info!("Selected node {} at height {height}", self.nodes[index]);
            }
            None => warn!("No chain node responded during reselection"),
        }
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct StuckProvider {
        failovers: AtomicU64,
    }

    #[async_trait]
    impl HeightProvider for StuckProvider {
        async fn block_height(&self) -> Result<i64> {
            Ok(0)
        }

        async fn select_best_node(&self) {
            self.failovers.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn stagnation_triggers_exactly_one_failover() {
        let provider = StuckProvider { failovers: AtomicU64::new(0) };
        let chain = Mutex::new(ChainState::new());

        for _ in 0..61 {
            let advanced = poll_once(&provider, &chain, 0, 60).await;
            assert!(advanced.is_none());
        }

        assert_eq!(provider.failovers.load(Ordering::SeqCst), 1);
        // Counter was reset: the next poll must not fail over again.
        poll_once(&provider, &chain, 0, 60).await;
        assert_eq!(provider.failovers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn advance_updates_running_average() {
        let mut st = ChainState::new();
        st.updated_at = 0;

        match st.observe(Some(100), 10, 60) {
            PollOutcome::Advanced(s) => {
                assert_eq!(s.block_height, 100);
                assert!((s.average_time - 10.0).abs() < 1e-9);
            }
            other => panic!("expected Advanced, got {other:?}"),
        }

        match st.observe(Some(101), 16, 60) {
            PollOutcome::Advanced(s) => assert!((s.average_time - 8.0).abs() < 1e-9),
            other => panic!("expected Advanced, got {other:?}"),
        }
    }

    #[test]
    fn advance_resets_stagnation_counter() {
        let mut st = ChainState::new();
        st.updated_at = 0;
        for _ in 0..59 {
            st.observe(None, 1, 60);
        }
        st.observe(Some(5), 2, 60);
        // 60 more stagnant polls only reach the threshold, not past it.
        for _ in 0..60 {
            match st.observe(Some(5), 3, 60) {
                PollOutcome::Hold => {}
                other => panic!("expected Hold, got {other:?}"),
            }
        }
    }

    #[test]
    fn height_never_regresses() {
        let mut st = ChainState::new();
        st.observe(Some(100), 1, 60);
        match st.observe(Some(50), 2, 60) {
            PollOutcome::Hold => assert_eq!(st.height, 100),
            other => panic!("regression must not advance, got {other:?}"),
        }
    }
}
