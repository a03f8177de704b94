use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

/// One rung of a ladder: a price and the volume available at it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub odds: f64,
    pub available: f64,
}

/// Back and lay ladders, one `Vec<PriceLevel>` per outcome, 0..=7 rungs each.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub back: Vec<Vec<PriceLevel>>,
    pub lay: Vec<Vec<PriceLevel>>,
}

impl OrderBook {
    /// Best displayed price per outcome — the first rung of each ladder.
    /// Outcomes whose ladder is empty are skipped, matching the re-synthesis
    /// path which treats a missing price as the no-data case.
    pub fn best_prices(&self) -> BestPrices {
        let firsts = |side: &[Vec<PriceLevel>]| -> Vec<f64> {
            side.iter()
                .filter_map(|ladder| ladder.first().map(|l| l.odds))
                .collect()
        };
        BestPrices {
            back: firsts(&self.back),
            lay: firsts(&self.lay),
        }
    }
}

/// Best back/lay price per outcome, the synthesis engine's input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BestPrices {
    pub back: Vec<f64>,
    pub lay: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub name: String,
    pub sport: String,
    #[serde(rename = "competition")]
    pub competition_id: String,
    pub competition_name: String,
    pub participants: Vec<String>,
    /// Event start as unix seconds, kept as a string for wire compatibility.
    #[serde(rename = "commence")]
    pub start_date: String,
    pub outcomes: usize,
    pub matched: f64,
    #[serde(rename = "match_odds")]
    pub book: Option<OrderBook>,
    /// Intrinsic popularity of the match in [0,1) — larger scale, deeper book.
    pub scale: f64,
}

impl Match {
    pub fn start_secs(&self) -> Option<i64> {
        self.start_date.parse().ok()
    }
}

/// Stable hash of a match name, used to break start-time ties deterministically.
pub fn name_hash(name: &str) -> u64 {
    // FNV-1a
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// Chronological ordering, ties broken by the name hash. Unparsable start
/// dates sort last.
pub fn sort_by_start(matches: &mut [Match]) {
    matches.sort_by_key(|m| (m.start_secs().unwrap_or(i64::MAX), name_hash(&m.name)));
}

/// Descending matched-volume ordering.
pub fn sort_by_matched(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.matched.total_cmp(&a.matched));
}

// ---------------------------------------------------------------------------
// Navigation rollups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sport {
    pub id: String,
    pub name: String,
    pub count: usize,
    pub competitions: Vec<Competition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub sport: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionInfo {
    pub id: String,
    pub sport: String,
    pub name: String,
    #[serde(rename = "commence")]
    pub start_date: i64,
    pub total_matched: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Navigation {
    #[serde(rename = "data")]
    pub sports: Vec<Sport>,
}

/// Sport slug plus its display priority, cached so the broadcaster can walk
/// sports in navigation order without reloading the navigation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SportKey {
    pub sport: String,
    pub index: u32,
}

/// Fixed display priority. Unknown sports sort last.
pub fn sport_priority(id: &str) -> u32 {
    match id {
        "soccer" => 1,
        "american-football" => 2,
        "mixed-martial-arts" => 3,
        "basketball" => 4,
        "cricket" => 5,
        "ice-hockey" => 6,
        "boxing" => 7,
        _ => 99,
    }
}

/// Upstream sport id → (slug, display name) for the sports we track.
pub fn sport_for_upstream_id(upstream_id: &str) -> Option<(&'static str, &'static str)> {
    match upstream_id {
        "1" => Some(("soccer", "Soccer")),
        "12" => Some(("american-football", "American Football")),
        "9" => Some(("mixed-martial-arts", "Mixed Martial Arts")),
        "18" => Some(("basketball", "Basketball")),
        "3" => Some(("cricket", "Cricket")),
        "17" => Some(("ice-hockey", "Ice Hockey")),
        "10" => Some(("boxing", "Boxing")),
        _ => None,
    }
}

/// All tracked sport slugs with display names, used to seed the per-run rollup.
pub fn tracked_sports() -> &'static [(&'static str, &'static str)] {
    &[
        ("soccer", "Soccer"),
        ("american-football", "American Football"),
        ("mixed-martial-arts", "Mixed Martial Arts"),
        ("basketball", "Basketball"),
        ("cricket", "Cricket"),
        ("ice-hockey", "Ice Hockey"),
        ("boxing", "Boxing"),
    ]
}

// ---------------------------------------------------------------------------
// Chain + currency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainSummary {
    pub block_height: i64,
    pub average_time: f64,
    pub updated_at: i64,
}

pub type Currency = HashMap<String, f64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceData {
    pub currency_data: HashMap<String, Currency>,
    pub exchange_rate: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
