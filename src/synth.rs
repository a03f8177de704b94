//! Synthetic order-book generation.
//!
//! Given a match's consensus back prices, its intrinsic scale and how close
//! the event is to kickoff, produces a full back/lay book: a bounded ladder of
//! (price, available volume) rungs per outcome. Prices walk away from the best
//! price deterministically; volumes carry uniform noise. A match's scale is
//! derived once from its identity by hashing into a seeded generator, so the
//! same match always gets the same scale across process restarts.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use sha2::{Digest, Sha256};

use crate::config::MAX_LADDER_DEPTH;
use crate::curves::{exponential, logistic, sigmoidal};
use crate::error::{AppError, Result};
use crate::types::{BestPrices, Match, OrderBook, PriceLevel};

/// Lay-spread baseline over match scale.
const LAY_SPREAD: [f64; 4] = [186.2695, 4.2213, 29.5378, -0.07];

/// Time scale over seconds-to-start — grows to 1 as x → 0.
const TIME_SCALE: [f64; 4] = [1.0, 0.2851116, 96_440_480_000.0, -19.12504];

/// Matched-volume limit over match scale — grows to ~2e7 as x → 1.
const MATCHED_LIMIT: [f64; 4] = [373_247_800_000_000_000.0, 7.202931, 0.9016243, -5068.0];

/// Target ladder depth over time scale + match scale.
const NUM_ODDS: [f64; 4] = [9.9308, -3.0139, 10.8597, -1.5];

/// Prices at or above this collapse to a single rung.
const PRICE_CEILING: f64 = 200.0;

/// Minimum lay-over-back increment and price floor terminator.
const MIN_INCREMENT: f64 = 0.01;
const PRICE_FLOOR: f64 = 1.01;

fn round_dp(x: f64, dp: u32) -> f64 {
    let f = 10f64.powi(dp as i32);
    (x * f).round() / f
}

/// Uniform noise in [-variance, variance).
fn add_noise<R: Rng>(rng: &mut R, variance: f64) -> f64 {
    let r: f64 = rng.gen();
    let sign = if rng.gen_bool(0.5) { -1.0 } else { 1.0 };
    sign * r * variance
}

/// Gaussian noise with standard deviation `variance`.
fn add_normal_noise<R: Rng>(rng: &mut R, variance: f64) -> f64 {
    let draw: f64 = StandardNormal.sample(rng);
    draw * variance
}

fn chance<R: Rng>(rng: &mut R, probability: f64) -> bool {
    rng.gen::<f64>() <= probability
}

/// Derive a match's scale in [0,1) from its stable identity string.
///
/// Sha256 truncated to 8 bytes seeds a ChaCha8 generator (fixed algorithm, so
/// the value is reproducible across runtimes); one uniform draw, 3 decimals.
pub fn derive_scale(identity: &str) -> f64 {
    let digest = Sha256::digest(identity.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut rng = ChaCha8Rng::seed_from_u64(u64::from_be_bytes(seed));
    let f: f64 = (rng.gen::<f64>() * 1000.0).round_ties_even() / 1000.0;
    f
}

/// Identity scale blended 50/50 with a league's base scale, so popular leagues
/// get systematically deeper books while two runs still agree on every match.
pub fn seeded_scale(identity: &str, base_scale: f64) -> f64 {
    let blended = (derive_scale(identity) + base_scale) / 2.0;
    (blended.clamp(0.0, 0.999) * 1000.0).round_ties_even() / 1000.0
}


/// Time scale for an event starting at `start_secs`, evaluated at `now_secs`.
/// Seconds-to-start is floored at 0; the curve grows to 1 as kickoff nears.
pub fn time_scale(start_secs: i64, now_secs: i64) -> f64 {
    let time_to = (start_secs - now_secs).max(0);
    sigmoidal(TIME_SCALE, time_to as f64)
}

/// Half the logistic lay-spread at this scale — the baseline added to every
/// consensus back price to place its best lay price.
pub fn lay_baseline(scale: f64) -> f64 {
    logistic(LAY_SPREAD, scale) / 2.0
}

/// Target ladder depth before per-outcome noise, clamped later to [0,7].
pub fn target_depth(ts: f64, scale: f64) -> f64 {
    logistic(NUM_ODDS, ts + scale) * 1.5
}

/// Build best lay prices from averaged consensus back prices. An outcome with
/// back price 0 (no contributing quotes) keeps lay 0 — the no-data case.
pub fn best_from_consensus<R: Rng>(rng: &mut R, back: Vec<f64>, scale: f64) -> BestPrices {
    let baseline = lay_baseline(scale);
    let lay = back
        .iter()
        .map(|&b| {
            if b == 0.0 {
                return 0.0;
            }
            let mut l = b + baseline + add_normal_noise(rng, baseline);
            if l - b < MIN_INCREMENT {
                l = b + MIN_INCREMENT;
            }
            l
        })
        .collect();
    BestPrices { back, lay }
}

/// Matched-volume marker for the whole book. Floored at 0.
pub fn matched_volume(ts: f64, scale: f64, exchange_rate: f64) -> f64 {
    let limit = exponential(MATCHED_LIMIT, scale).max(0.0).powf(0.9);
    round_dp(ts * limit * exchange_rate, 1).max(0.0)
}

/// Generate the full order book from best prices.
///
/// Each rung walks the price away from the best price proportionally to its
/// index and a quadratic of the best price; volume grows with (ts+scale)² plus
/// a super-linear term in the index, with ±80% uniform noise. A price that
/// resolves to exactly 0 ends the ladder; ≤1.01 clamps and ends it; ≥200
/// collapses to a single rung at exactly 200.
pub fn generate_book<R: Rng>(
    rng: &mut R,
    best: &BestPrices,
    depth: f64,
    scale: f64,
    ts: f64,
    exchange_rate: f64,
) -> OrderBook {
    let back = generate_side(rng, &best.back, -1.0, depth, scale, ts, exchange_rate);
    let lay = generate_side(rng, &best.lay, 1.0, depth, scale, ts, exchange_rate);
    OrderBook { back, lay }
}

fn generate_side<R: Rng>(
    rng: &mut R,
    best: &[f64],
    direction: f64,
    depth: f64,
    scale: f64,
    ts: f64,
    exchange_rate: f64,
) -> Vec<Vec<PriceLevel>> {
    best.iter()
        .map(|&b| {
            let rungs = (depth + add_noise(rng, 2.0)).round().clamp(0.0, MAX_LADDER_DEPTH as f64)
                as usize;

            let mut ladder = Vec::with_capacity(rungs);
            for i in 0..rungs {
                if b >= PRICE_CEILING {
                    let available = round_dp(rng.gen::<f64>() * 100.0 * exchange_rate, 1).max(0.1);
                    ladder.push(PriceLevel { odds: PRICE_CEILING, available });
                    break;
                }

                let fi = i as f64;
                let step = 0.011 * (b / 1.3).powi(2) + 0.01 * fi * rng.gen::<f64>() / 1.5;
                let base = (7.5 * (ts + scale)).powi(2);
                let available = base + (5.0 * fi.powf(1.6) * (ts + scale)).powi(2);

                let mut odds = b + step * direction * fi;
                let mut terminal = false;
                if odds == 0.0 {
                    break;
                } else if odds <= PRICE_FLOOR {
                    odds = PRICE_FLOOR;
                    terminal = true;
                }

                let available =
                    round_dp((available + add_noise(rng, available * 0.8)) * exchange_rate, 1)
                        .max(0.1);

                ladder.push(PriceLevel { odds: round_dp(odds, 2), available });
                if terminal {
                    break;
                }
            }

            ladder
        })
        .collect()
}

/// Re-derive a match's book and matched volume from its best prices.
///
/// Regenerates when the match has no book yet (first sighting — this is also
/// when the identity-seeded scale is locked in), with probability
/// min(ts/1.4, 1) on later ticks, and unconditionally once the event has
/// started, so far-future books don't jitter every tick but always settle at
/// kickoff.
pub fn refresh_match<R: Rng>(
    rng: &mut R,
    m: &mut Match,
    best: &BestPrices,
    exchange_rate: f64,
    now_secs: i64,
) -> Result<()> {
    let start = m
        .start_secs()
        .ok_or_else(|| AppError::Malformed(format!("bad start date: {}", m.start_date)))?;

    let time_to = (start - now_secs).max(0);
    let ts = time_scale(start, now_secs);

    if m.book.is_none() {
        if m.scale == 0.0 {
            m.scale = derive_scale(&m.name);
        }
    } else if time_to > 0 && !chance(rng, (ts / 1.4).min(1.0)) {
        return Ok(());
    }

    m.matched = matched_volume(ts, m.scale, exchange_rate);
    let depth = target_depth(ts, m.scale);
    m.book = Some(generate_book(rng, best, depth, m.scale, ts, exchange_rate));
    Ok(())
}
