//! Recompute job: every few seconds, re-synthesize the cached matches from
//! their own current best prices and rebuild the aggregate views. No upstream
//! calls happen here; books drift locally between full ingestion runs, with
//! the regeneration throttle in `synth` keeping far-future matches quiet.

use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::cache::{keys, Cache};
use crate::chain::now_secs;
use crate::config::RECOMPUTE_INTERVAL_SECS;
use crate::error::Result;
use crate::ingest::{flush_aggregates, Aggregates};
use crate::state::PipelineState;
use crate::synth::refresh_match;
use crate::types::{BestPrices, Match};

pub struct Recomputer {
    cache: Cache,
    state: Arc<PipelineState>,
}

impl Recomputer {
    pub fn new(cache: Cache, state: Arc<PipelineState>) -> Self {
        Self { cache, state }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(RECOMPUTE_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("Recompute pass skipped: {e}");
            }
        }
    }

    /// One pass: load, refresh every match, rebuild the views, write back.
    /// A cache read failure aborts the whole pass; the previous views stay.
    pub async fn run_once(&self) -> Result<()> {
        let matches: Vec<Match> = self.cache.get(keys::ALL_MATCHES).await?;
        let exchange_rate = self.state.exchange_rate().await;

        let agg = recompute_all(matches, exchange_rate, now_secs());
        debug!("Recomputed {} matches", agg.matches.len());

        flush_aggregates(&self.cache, &self.state, &agg).await
    }
}

/// Refresh each match from its own book's best prices and merge the results
/// into fresh aggregates, so the per-sport and per-competition views always
/// describe the same refreshed set. Matches whose start date no longer parses
/// are dropped with a warning.
pub fn recompute_all(matches: Vec<Match>, exchange_rate: f64, now: i64) -> Aggregates {
    let mut rng = thread_rng();
    let mut agg = Aggregates::default();

    for mut m in matches {
        let best = match &m.book {
            Some(book) => book.best_prices(),
            None => BestPrices::default(),
        };
        if let Err(e) = refresh_match(&mut rng, &mut m, &best, exchange_rate, now) {
            warn!("Dropping match {}: {e}", m.name);
            continue;
        }
        agg.merge(m);
    }

    agg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderBook, PriceLevel};

    fn mk(name: &str, competition: &str, start: i64) -> Match {
        Match {
            name: name.to_string(),
            sport: "soccer".to_string(),
            competition_id: competition.to_string(),
            competition_name: "Comp".to_string(),
            participants: vec![],
            start_date: start.to_string(),
            outcomes: 2,
            matched: 3.0,
            book: Some(OrderBook {
                back: vec![vec![PriceLevel { odds: 2.5, available: 10.0 }]],
                lay: vec![vec![PriceLevel { odds: 2.6, available: 8.0 }]],
            }),
            scale: 0.4,
        }
    }

    #[test]
    fn recompute_preserves_the_match_set() {
        let matches =
            vec![mk("a_b", "premier-league", 100), mk("c_d", "premier-league", 50), mk("e_f", "nba", 70)];
        let agg = recompute_all(matches, 1.0, 100);

        assert_eq!(agg.matches.len(), 3);
        let by_comp: usize = agg.competition_matches.values().map(Vec::len).sum();
        assert_eq!(by_comp, 3);
        assert_eq!(agg.competitions["premier-league"].start_date, 50);
        // Every kept match still has a book after the pass.
        assert!(agg.matches.iter().all(|m| m.book.is_some()));
    }

    #[test]
    fn recompute_drops_matches_with_broken_start_dates() {
        let mut bad = mk("x_y", "nba", 10);
        bad.start_date = "soon".to_string();
        let agg = recompute_all(vec![bad, mk("a_b", "nba", 10)], 1.0, 5);
        assert_eq!(agg.matches.len(), 1);
        assert_eq!(agg.matches[0].name, "a_b");
    }

    #[test]
    fn recompute_keeps_the_locked_scale() {
        let m = mk("a_b", "nba", 1_000);
        let scale = m.scale;
        let agg = recompute_all(vec![m], 1.0, 1_000);
        assert_eq!(agg.matches[0].scale, scale);
    }
}
