//! Snapshot broadcaster. Builds per-channel top-N views of the cached match
//! aggregates (chronological and by matched volume), encodes them, and pushes
//! them with bounded retry. A channel that exhausts its retries is logged and
//! skipped; a broadcast cycle never fails the process.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::error;

use crate::cache::{keys, Cache};
use crate::config::{FRONT_PAGE_PER_SPORT, MAX_BROADCAST_RESULTS, PUBLISH_MAX_ATTEMPTS};
use crate::error::{AppError, Result};
use crate::push::PushChannel;
use crate::state::PipelineState;
use crate::types::{sort_by_matched, sort_by_start, ChainSummary, Currency, Match, SportKey};

pub const APP_UPDATE_EVENT: &str = "app-update";

#[derive(Debug, Clone, Copy)]
pub enum SnapshotOrder {
    Start,
    Popular,
}

#[derive(Serialize)]
pub struct AppUpdate {
    pub matches: Vec<Match>,
    pub currencies: HashMap<String, Currency>,
    pub blockchain_data: ChainSummary,
}

/// Sort and truncate one channel's match collection.
pub fn snapshot(mut matches: Vec<Match>, order: SnapshotOrder) -> Vec<Match> {
    match order {
        SnapshotOrder::Start => sort_by_start(&mut matches),
        SnapshotOrder::Popular => sort_by_matched(&mut matches),
    }
    matches.truncate(MAX_BROADCAST_RESULTS);
    matches
}

/// Front-page view: the top few matches of each sport, sports walked in
/// navigation priority order.
pub fn front_page(
    sport_matches: &HashMap<String, Vec<Match>>,
    sport_keys: &[SportKey],
    order: SnapshotOrder,
) -> Vec<Match> {
    let mut out = Vec::new();
    for key in sport_keys {
        let Some(matches) = sport_matches.get(&key.sport) else { continue };
        let mut matches = matches.clone();
        match order {
            SnapshotOrder::Start => sort_by_start(&mut matches),
            SnapshotOrder::Popular => sort_by_matched(&mut matches),
        }
        matches.truncate(FRONT_PAGE_PER_SPORT);
        out.extend(matches);
    }
    out
}

/// JSON → zlib → base64, the transport encoding consumers expect.
pub fn encode_payload<T: Serialize>(data: &T) -> Result<String> {
    let json = serde_json::to_vec(data)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

/// Publish with bounded retry. Returns the last error once attempts run out.
pub async fn publish_with_retry(
    push: &dyn PushChannel,
    channel: &str,
    event: &str,
    payload: &str,
) -> Result<()> {
    let mut last_err = AppError::Publish(format!("no attempts made for {channel}"));
    for _ in 0..PUBLISH_MAX_ATTEMPTS {
        match push.publish(channel, event, payload).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

pub struct Broadcaster {
    cache: Cache,
    push: Arc<dyn PushChannel>,
    state: Arc<PipelineState>,
}

impl Broadcaster {
    pub fn new(cache: Cache, push: Arc<dyn PushChannel>, state: Arc<PipelineState>) -> Self {
        Self { cache, push, state }
    }

    /// One full publish cycle, run after every block-height advance.
    pub async fn run_cycle(&self, chain: &ChainSummary) {
        let sport_matches: HashMap<String, Vec<Match>> =
            match self.cache.get(keys::SPORT_MATCHES).await {
                Ok(v) => v,
                Err(e) => {
                    error!("Broadcast cycle aborted, cannot load sport matches: {e}");
                    return;
                }
            };
        let competition_matches: HashMap<String, Vec<Match>> =
            match self.cache.get(keys::COMPETITION_MATCHES).await {
                Ok(v) => v,
                Err(e) => {
                    error!("Broadcast cycle aborted, cannot load competition matches: {e}");
                    return;
                }
            };

        let currencies = self.state.price_data().await.currency_data;
        let sport_keys = self.state.sport_keys().await;

        for (sport, matches) in &sport_matches {
            self.push_pair(matches.clone(), sport, &currencies, chain).await;
        }

        for (competition, matches) in &competition_matches {
            let Some(sport) = matches.first().map(|m| m.sport.clone()) else { continue };
            let channel = format!("{sport}-{competition}");
            self.push_pair(matches.clone(), &channel, &currencies, chain).await;
        }

        self.push_front_page(&sport_matches, &sport_keys, &currencies, chain).await;
    }

    /// Publish both orderings of one channel's collection.
    async fn push_pair(
        &self,
        matches: Vec<Match>,
        channel: &str,
        currencies: &HashMap<String, Currency>,
        chain: &ChainSummary,
    ) {
        let pairs = [
            (format!("markets-{channel}-date"), snapshot(matches.clone(), SnapshotOrder::Start)),
            (format!("markets-{channel}-popular"), snapshot(matches, SnapshotOrder::Popular)),
        ];
        for (topic, matches) in pairs {
            self.publish_update(&topic, matches, currencies, chain).await;
        }
    }

    async fn push_front_page(
        &self,
        sport_matches: &HashMap<String, Vec<Match>>,
        sport_keys: &[SportKey],
        currencies: &HashMap<String, Currency>,
        chain: &ChainSummary,
    ) {
        let pairs = [
            ("markets-date", front_page(sport_matches, sport_keys, SnapshotOrder::Start)),
            ("markets-popular", front_page(sport_matches, sport_keys, SnapshotOrder::Popular)),
        ];
        for (topic, matches) in pairs {
            self.publish_update(topic, matches, currencies, chain).await;
        }
    }

    async fn publish_update(
        &self,
        topic: &str,
        matches: Vec<Match>,
        currencies: &HashMap<String, Currency>,
        chain: &ChainSummary,
    ) {
        let update = AppUpdate {
            matches,
            currencies: currencies.clone(),
            blockchain_data: chain.clone(),
        };
        let payload = match encode_payload(&update) {
            Ok(p) => p,
            Err(e) => {
                error!("Unable to encode payload for {topic}: {e}");
                return;
            }
        };
        if let Err(e) = publish_with_retry(self.push.as_ref(), topic, APP_UPDATE_EVENT, &payload).await
        {
            error!("Giving up on {topic} after {PUBLISH_MAX_ATTEMPTS} attempts: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Read;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn mk(name: &str, sport: &str, start: i64, matched: f64) -> Match {
        Match {
            name: name.to_string(),
            sport: sport.to_string(),
            competition_id: "comp".to_string(),
            competition_name: "Comp".to_string(),
            participants: vec![],
            start_date: start.to_string(),
            outcomes: 2,
            matched,
            book: None,
            scale: 0.5,
        }
    }

    #[test]
    fn snapshot_truncates_to_top_25() {
        let matches: Vec<Match> =
            (0..40).map(|i| mk(&format!("m{i}"), "soccer", 1000 + i, i as f64)).collect();
        let snap = snapshot(matches.clone(), SnapshotOrder::Start);
        assert_eq!(snap.len(), 25);
        assert_eq!(snap[0].name, "m0");

        let snap = snapshot(matches, SnapshotOrder::Popular);
        assert_eq!(snap.len(), 25);
        assert_eq!(snap[0].name, "m39");
    }

    #[test]
    fn front_page_walks_sports_in_key_order() {
        let mut map = HashMap::new();
        map.insert(
            "soccer".to_string(),
            (0..5).map(|i| mk(&format!("s{i}"), "soccer", 100 + i, 0.0)).collect::<Vec<_>>(),
        );
        map.insert(
            "boxing".to_string(),
            (0..2).map(|i| mk(&format!("b{i}"), "boxing", 50 + i, 0.0)).collect::<Vec<_>>(),
        );
        let keys = vec![
            SportKey { sport: "soccer".to_string(), index: 1 },
            SportKey { sport: "boxing".to_string(), index: 7 },
        ];

        let fp = front_page(&map, &keys, SnapshotOrder::Start);
        let names: Vec<_> = fp.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["s0", "s1", "s2", "b0", "b1"]);
    }

    #[test]
    fn encoded_payload_round_trips() {
        let update = AppUpdate {
            matches: vec![mk("a_b", "soccer", 123, 4.5)],
            currencies: HashMap::new(),
            blockchain_data: ChainSummary { block_height: 7, average_time: 20.5, updated_at: 99 },
        };
        let encoded = encode_payload(&update).unwrap();

        let compressed = BASE64.decode(encoded).unwrap();
        let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
        let mut json = String::new();
        decoder.read_to_string(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["blockchain_data"]["block_height"], 7);
        assert_eq!(value["matches"][0]["name"], "a_b");
    }

    struct FlakyPush {
        fail_first: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl PushChannel for FlakyPush {
        async fn publish(&self, _channel: &str, _event: &str, _payload: &str) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(AppError::Publish("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn publish_retries_until_success() {
        let push = FlakyPush { fail_first: 2, attempts: AtomicU32::new(0) };
        let result = publish_with_retry(&push, "markets-soccer-date", APP_UPDATE_EVENT, "x").await;
        assert!(result.is_ok());
        assert_eq!(push.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn publish_gives_up_after_five_attempts() {
        let push = FlakyPush { fail_first: u32::MAX, attempts: AtomicU32::new(0) };
        let result = publish_with_retry(&push, "markets-soccer-date", APP_UPDATE_EVENT, "x").await;
        assert!(result.is_err());
        assert_eq!(push.attempts.load(Ordering::SeqCst), 5);
    }
}
