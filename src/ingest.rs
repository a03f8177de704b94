//! Full ingestion run: fetch upcoming events for every whitelisted league,
//! resolve each event's provider odds into a consensus price, synthesize a
//! book, and merge everything into per-sport / per-competition aggregates that
//! replace the cached set wholesale.
//!
//! Providers are untrusted. A payload that is `null` or carries no odds is the
//! empty case and simply contributes nothing; anything that is not an object
//! is malformed and counted, never fatal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{info, warn};

use crate::cache::{keys, Cache};
use crate::chain::now_secs;
use crate::config::{
    Config, INGEST_INTERVAL_SECS, MAX_CONCURRENT_EVENTS, MAX_CONCURRENT_LEAGUES,
    UPSTREAM_TIMEOUT_SECS,
};
use crate::error::{AppError, Result};
use crate::state::PipelineState;
use crate::synth::{best_from_consensus, refresh_match, seeded_scale};
use crate::types::{
    sport_for_upstream_id, sport_priority, tracked_sports, Competition, CompetitionInfo, Match,
    Navigation, Sport, SportKey,
};
use crate::whitelist::League;

// ---------------------------------------------------------------------------
// Upstream wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    results: Vec<UpstreamEvent>,
}

#[derive(Debug, Deserialize)]
struct UpstreamEvent {
    id: String,
    /// Unix seconds, as a string on the wire.
    time: String,
    home: Participant,
    away: Participant,
}

#[derive(Debug, Deserialize)]
struct Participant {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OddsSummaryResponse {
    #[serde(default)]
    results: HashMap<String, Value>,
}

/// One provider's match-odds quote, American moneyline strings.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuotes {
    #[serde(rename = "home_od")]
    pub home: Option<String>,
    #[serde(rename = "away_od")]
    pub away: Option<String>,
    #[serde(rename = "draw_od")]
    pub draw: Option<String>,
}

#[derive(Debug)]
pub enum ProviderPayload {
    Quotes(ProviderQuotes),
    /// Provider listed but carrying no odds for this market.
    Empty,
    Malformed,
}

/// Tagged-union decode of one provider entry.
pub fn classify(value: &Value) -> ProviderPayload {
    match value {
        Value::Null => ProviderPayload::Empty,
        Value::Object(_) => match serde_json::from_value::<ProviderQuotes>(value.clone()) {
            Ok(q) if q.home.is_none() && q.away.is_none() && q.draw.is_none() => {
                ProviderPayload::Empty
            }
            Ok(q) => ProviderPayload::Quotes(q),
            Err(_) => ProviderPayload::Malformed,
        },
        _ => ProviderPayload::Malformed,
    }
}

/// American moneyline string → decimal odds, 2 decimals. `+150` pays 2.50,
/// `-200` pays 1.50. Zero or unparsable lines are excluded from the consensus.
pub fn convert_moneyline(line: &str) -> Option<f64> {
    let value: f64 = line.trim().parse().ok()?;
    if !value.is_finite() || value == 0.0 {
        return None;
    }
    let decimal = if value > 0.0 { value / 100.0 + 1.0 } else { 100.0 / -value + 1.0 };
    Some((decimal * 100.0).round() / 100.0)
}

/// Average the valid converted quotes per outcome. An outcome with no valid
/// contribution averages to 0, the no-data marker the synthesizer honors.
/// Any present draw quote marks the market 3-way, even one that fails to
/// convert — the invalid value is still excluded from the average.
pub fn average_prices(quotes: &[ProviderQuotes]) -> Vec<f64> {
    let column = |pick: fn(&ProviderQuotes) -> Option<&String>| -> f64 {
        let valid: Vec<f64> = quotes
            .iter()
            .filter_map(|q| pick(q).and_then(|s| convert_moneyline(s)))
            .collect();
        if valid.is_empty() {
            0.0
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        }
    };

    let has_draw = quotes
        .iter()
        .any(|q| q.draw.as_deref().is_some_and(|s| !s.trim().is_empty()));

    let mut prices = vec![column(|q| q.home.as_ref()), column(|q| q.away.as_ref())];
    if has_draw {
        prices.push(column(|q| q.draw.as_ref()));
    }
    prices
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Per-run merge target. One critical section per merged match; the run's
/// totals are therefore always consistent across the three match views.
#[derive(Debug, Default)]
pub struct Aggregates {
    pub matches: Vec<Match>,
    pub sport_matches: HashMap<String, Vec<Match>>,
    pub competition_matches: HashMap<String, Vec<Match>>,
    pub competitions: HashMap<String, CompetitionInfo>,
}

impl Aggregates {
    pub fn merge(&mut self, m: Match) {
        let info = self
            .competitions
            .entry(m.competition_id.clone())
            .or_insert_with(|| CompetitionInfo {
                id: m.competition_id.clone(),
                sport: m.sport.clone(),
                name: m.competition_name.clone(),
                start_date: i64::MAX,
                total_matched: 0.0,
            });
        info.total_matched += m.matched;
        if let Some(start) = m.start_secs() {
            info.start_date = info.start_date.min(start);
        }

        self.sport_matches.entry(m.sport.clone()).or_default().push(m.clone());
        self.competition_matches.entry(m.competition_id.clone()).or_default().push(m.clone());
        self.matches.push(m);
    }
}

/// Navigation rollup over a finished run. Every tracked sport appears even
/// with zero matches; competitions list alphabetically within their sport and
/// sports in fixed display priority.
pub fn rollup(agg: &Aggregates) -> (Navigation, Vec<SportKey>, HashMap<String, f64>) {
    let mut sports: Vec<Sport> = tracked_sports()
        .iter()
        .map(|&(id, name)| Sport {
            id: id.to_string(),
            name: name.to_string(),
            count: 0,
            competitions: Vec::new(),
        })
        .collect();

    let mut infos: Vec<&CompetitionInfo> = agg.competitions.values().collect();
    infos.sort_by(|a, b| a.name.cmp(&b.name));

    for info in infos {
        let count = agg.competition_matches.get(&info.id).map_or(0, Vec::len);
        if let Some(sport) = sports.iter_mut().find(|s| s.id == info.sport) {
            sport.count += count;
            sport.competitions.push(Competition {
                id: info.id.clone(),
                name: info.name.clone(),
                sport: info.sport.clone(),
                count,
            });
        }
    }

    sports.sort_by_key(|s| sport_priority(&s.id));
    let sport_keys = sports
        .iter()
        .map(|s| SportKey { sport: s.id.clone(), index: sport_priority(&s.id) })
        .collect();

    let amounts = agg
        .competitions
        .iter()
        .map(|(id, info)| (id.clone(), info.total_matched))
        .collect();

    (Navigation { sports }, sport_keys, amounts)
}

// ---------------------------------------------------------------------------
// Ingestor job
// ---------------------------------------------------------------------------

pub struct Ingestor {
    cfg: Config,
    http: reqwest::Client,
    cache: Cache,
    state: Arc<PipelineState>,
    leagues: Vec<League>,
}

impl Ingestor {
    pub fn new(
        cfg: Config,
        cache: Cache,
        state: Arc<PipelineState>,
        leagues: Vec<League>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()?;
        Ok(Self { cfg, http, cache, state, leagues })
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(INGEST_INTERVAL_SECS));
        ticker.tick().await; // startup run already happened
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// One full fetch-synthesize-merge-flush pass.
    pub async fn run_once(&self) {
        let exchange_rate = self.state.exchange_rate().await;
        let agg = Arc::new(Mutex::new(Aggregates::default()));

        stream::iter(&self.leagues)
            .for_each_concurrent(MAX_CONCURRENT_LEAGUES, |league| {
                let agg = Arc::clone(&agg);
                async move {
                    if let Err(e) = self.ingest_league(league, &agg, exchange_rate).await {
                        warn!("League {} skipped: {e}", league.internal_id);
                    }
                }
            })
            .await;

        let agg = std::mem::take(&mut *agg.lock().await);
        info!(
            "Ingestion merged {} matches across {} competitions",
            agg.matches.len(),
            agg.competitions.len()
        );

        if let Err(e) = flush_aggregates(&self.cache, &self.state, &agg).await {
            warn!("Ingestion flush failed: {e}");
        }
    }

    async fn ingest_league(
        &self,
        league: &League,
        agg: &Mutex<Aggregates>,
        exchange_rate: f64,
    ) -> Result<()> {
        let (sport, _) = sport_for_upstream_id(&league.sport_id)
            .ok_or_else(|| AppError::Malformed(format!("unknown sport id {}", league.sport_id)))?;

        let events = self.fetch_events(league).await?;
        let now = now_secs();

        stream::iter(events)
            .for_each_concurrent(MAX_CONCURRENT_EVENTS, |event| async move {
                match self.build_match(&event, league, sport, exchange_rate, now).await {
                    Ok(m) => agg.lock().await.merge(m),
                    Err(e) => warn!("Event {} in {} skipped: {e}", event.id, league.internal_id),
                }
            })
            .await;

        Ok(())
    }

    /// Resolve one event's odds and synthesize its match record.
    async fn build_match(
        &self,
        event: &UpstreamEvent,
        league: &League,
        sport: &str,
        exchange_rate: f64,
        now: i64,
    ) -> Result<Match> {
        let payloads = self.fetch_odds(&event.id).await?;

        let mut quotes = Vec::new();
        let mut malformed = 0usize;
        for (provider, value) in &payloads {
            match classify(value) {
                ProviderPayload::Quotes(q) => quotes.push(q),
                ProviderPayload::Empty => {}
                ProviderPayload::Malformed => {
                    warn!("Malformed odds payload from {provider} for event {}", event.id);
                    malformed += 1;
                }
            }
        }
        if malformed == payloads.len() && !payloads.is_empty() {
            return Err(AppError::Malformed(format!(
                "all {malformed} provider payloads malformed"
            )));
        }

        let back = average_prices(&quotes);
        let name = format!("{}_{}", event.home.name, event.away.name);

        let mut m = Match {
            name: name.clone(),
            sport: sport.to_string(),
            competition_id: league.internal_id.clone(),
            competition_name: league.name.clone(),
            participants: vec![event.home.name.clone(), event.away.name.clone()],
            start_date: event.time.clone(),
            outcomes: back.len(),
            matched: 0.0,
            book: None,
            scale: seeded_scale(&name, league.base_scale),
        };

        let mut rng = rand::thread_rng();
        let best = best_from_consensus(&mut rng, back, m.scale);
        refresh_match(&mut rng, &mut m, &best, exchange_rate, now)?;
        Ok(m)
    }

    async fn fetch_events(&self, league: &League) -> Result<Vec<UpstreamEvent>> {
        let url = format!("{}/events/upcoming", self.cfg.sports_api_url);
        let resp: EventsResponse = self
            .http
            .get(&url)
            .query(&[
                ("sport_id", league.sport_id.as_str()),
                ("league_id", league.league_id.as_str()),
                ("token", self.cfg.sports_api_token.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.results)
    }

    async fn fetch_odds(&self, event_id: &str) -> Result<Vec<(String, Value)>> {
        let url = format!("{}/event/odds/summary", self.cfg.sports_api_url);
        let resp: OddsSummaryResponse = self
            .http
            .get(&url)
            .query(&[("event_id", event_id), ("token", self.cfg.sports_api_token.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.results.into_iter().collect())
    }
}

/// Replace the cached aggregate set. Same-key writes are whole-blob, so a
/// reader sees either the previous run's view or this one's, never a
/// partially merged run.
pub async fn flush_aggregates(
    cache: &Cache,
    state: &PipelineState,
    agg: &Aggregates,
) -> Result<()> {
    let (navigation, sport_keys, amounts) = rollup(agg);

    cache.set(keys::ALL_MATCHES, &agg.matches).await?;
    cache.set(keys::SPORT_MATCHES, &agg.sport_matches).await?;
    cache.set(keys::COMPETITION_MATCHES, &agg.competition_matches).await?;
    cache.set(keys::COMPETITION_DETAIL, &agg.competitions).await?;
    cache.set(keys::COMPETITION_AMOUNTS, &amounts).await?;
    cache.set(keys::NAVIGATION, &navigation).await?;
    cache.set(keys::SPORT_KEYS, &sport_keys).await?;

    state.set_sport_keys(sport_keys).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{best_from_consensus, generate_book, target_depth};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    #[test]
    fn classify_separates_empty_from_malformed() {
        assert!(matches!(classify(&Value::Null), ProviderPayload::Empty));
        assert!(matches!(classify(&json!({})), ProviderPayload::Empty));
        assert!(matches!(
            classify(&json!({"home_od": null, "away_od": null})),
            ProviderPayload::Empty
        ));
        assert!(matches!(
            classify(&json!({"home_od": "+150", "away_od": "-200"})),
            ProviderPayload::Quotes(_)
        ));
        assert!(matches!(classify(&json!([1, 2, 3])), ProviderPayload::Malformed));
        assert!(matches!(classify(&json!("+150")), ProviderPayload::Malformed));
    }

    #[test]
    fn moneyline_conversion_matches_known_lines() {
        assert_eq!(convert_moneyline("+150"), Some(2.50));
        assert_eq!(convert_moneyline("-200"), Some(1.50));
        assert_eq!(convert_moneyline("-110"), Some(1.91));
        assert_eq!(convert_moneyline("100"), Some(2.00));
        assert_eq!(convert_moneyline("0"), None);
        assert_eq!(convert_moneyline("evens"), None);
    }

    #[test]
    fn consensus_averages_only_valid_quotes() {
        let quotes = vec![
            ProviderQuotes {
                home: Some("+150".to_string()),
                away: Some("-200".to_string()),
                draw: None,
            },
            ProviderQuotes {
                home: Some("-200".to_string()),
                away: Some("junk".to_string()),
                draw: None,
            },
        ];
        let prices = average_prices(&quotes);
        // home: (2.50 + 1.50) / 2; away: only the valid -200.
        assert_eq!(prices, vec![2.0, 1.50]);
    }

    #[test]
    fn draw_column_appears_only_when_quoted() {
        let two_way = vec![ProviderQuotes {
            home: Some("+100".to_string()),
            away: Some("-100".to_string()),
            draw: None,
        }];
        assert_eq!(average_prices(&two_way).len(), 2);

        let three_way = vec![ProviderQuotes {
            home: Some("+100".to_string()),
            away: Some("-100".to_string()),
            draw: Some("+250".to_string()),
        }];
        let prices = average_prices(&three_way);
        assert_eq!(prices.len(), 3);
        assert_eq!(prices[2], 3.50);
    }

    #[test]
    fn present_but_invalid_draw_still_marks_three_way() {
        let quotes = vec![ProviderQuotes {
            home: Some("+100".to_string()),
            away: Some("-100".to_string()),
            draw: Some("sp".to_string()),
        }];
        // Third column appears; the unconvertible quote contributes nothing.
        assert_eq!(average_prices(&quotes), vec![2.0, 2.0, 0.0]);
    }

    #[test]
    fn two_way_consensus_synthesizes_a_covered_book() {
        // Two providers agreeing on +150 home / -200 away, no draw.
        let quotes = vec![
            ProviderQuotes {
                home: Some("+150".to_string()),
                away: Some("-200".to_string()),
                draw: None,
            },
            ProviderQuotes {
                home: Some("+150".to_string()),
                away: Some("-200".to_string()),
                draw: None,
            },
        ];
        let back = average_prices(&quotes);
        assert_eq!(back, vec![2.50, 1.50]);

        for seed in 0..200 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let best = best_from_consensus(&mut rng, back.clone(), 0.5);
            assert_eq!(best.back.len(), 2);
            for (b, l) in best.back.iter().zip(&best.lay) {
                assert!(l - b >= 0.01 - 1e-9, "lay {l} must cover back {b} + 0.01");
            }

            let book = generate_book(&mut rng, &best, target_depth(0.8, 0.5), 0.5, 0.8, 1.0);
            assert_eq!(book.back.len(), 2);
            assert_eq!(book.lay.len(), 2);
            for ladder in book.back.iter().chain(book.lay.iter()) {
                assert!(ladder.len() <= 7);
                for level in ladder {
                    assert!(level.available >= 0.1);
                }
            }
        }
    }

    #[test]
    fn no_valid_quotes_average_to_zero() {
        let quotes = vec![ProviderQuotes {
            home: Some("n/a".to_string()),
            away: None,
            draw: None,
        }];
        assert_eq!(average_prices(&quotes), vec![0.0, 0.0]);
        assert_eq!(average_prices(&[]), vec![0.0, 0.0]);
    }

    fn mk(name: &str, sport: &str, competition: &str, start: i64, matched: f64) -> Match {
        Match {
            name: name.to_string(),
            sport: sport.to_string(),
            competition_id: competition.to_string(),
            competition_name: competition.to_uppercase(),
            participants: vec![],
            start_date: start.to_string(),
            outcomes: 2,
            matched,
            book: None,
            scale: 0.5,
        }
    }

    #[test]
    fn merged_views_agree_on_totals() {
        let mut agg = Aggregates::default();
        agg.merge(mk("a_b", "soccer", "premier-league", 100, 10.0));
        agg.merge(mk("c_d", "soccer", "premier-league", 50, 5.0));
        agg.merge(mk("e_f", "soccer", "a-league", 70, 2.0));
        agg.merge(mk("g_h", "basketball", "nba", 60, 20.0));

        let by_sport: usize = agg.sport_matches.values().map(Vec::len).sum();
        let by_comp: usize = agg.competition_matches.values().map(Vec::len).sum();
        assert_eq!(agg.matches.len(), 4);
        assert_eq!(by_sport, 4);
        assert_eq!(by_comp, 4);

        let pl = &agg.competitions["premier-league"];
        assert_eq!(pl.total_matched, 15.0);
        assert_eq!(pl.start_date, 50);
    }

    #[tokio::test]
    async fn concurrent_merges_keep_views_consistent() {
        let agg = Arc::new(Mutex::new(Aggregates::default()));

        let mut handles = Vec::new();
        for i in 0..100u32 {
            let agg = Arc::clone(&agg);
            handles.push(tokio::spawn(async move {
                let sport = if i % 2 == 0 { "soccer" } else { "basketball" };
                let competition = if i % 3 == 0 { "premier-league" } else { "nba" };
                let m = mk(&format!("home{i}_away{i}"), sport, competition, 100 + i as i64, 1.0);
                agg.lock().await.merge(m);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let agg = agg.lock().await;
        let by_sport: usize = agg.sport_matches.values().map(Vec::len).sum();
        let by_comp: usize = agg.competition_matches.values().map(Vec::len).sum();
        assert_eq!(agg.matches.len(), 100);
        assert_eq!(by_sport, 100);
        assert_eq!(by_comp, 100);

        let total: f64 = agg.competitions.values().map(|c| c.total_matched).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn rollup_orders_sports_and_competitions() {
        let mut agg = Aggregates::default();
        agg.merge(mk("g_h", "basketball", "nba", 60, 20.0));
        agg.merge(mk("a_b", "soccer", "premier-league", 100, 10.0));
        agg.merge(mk("e_f", "soccer", "a-league", 70, 2.0));

        let (nav, keys, amounts) = rollup(&agg);

        // Soccer first by priority; all tracked sports present.
        assert_eq!(nav.sports[0].id, "soccer");
        assert_eq!(nav.sports.len(), tracked_sports().len());
        assert_eq!(nav.sports[0].count, 2);

        // Competitions alphabetical within a sport.
        let soccer_comps: Vec<_> =
            nav.sports[0].competitions.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(soccer_comps, vec!["a-league", "premier-league"]);

        assert_eq!(keys[0].sport, "soccer");
        assert_eq!(keys[0].index, 1);
        assert_eq!(amounts["nba"], 20.0);
    }
}
