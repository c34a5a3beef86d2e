//! Per-second rate derivation from pairs of cumulative-counter samples.

use chrono::{DateTime, Utc};

use crate::rpc::StatsReading;
use crate::store::entity::stats_sample;

/// Windows of five seconds or less are too noisy to derive a rate from.
pub const MIN_RATE_WINDOW_SECS: i64 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DerivedRates {
    pub packets_in_per_sec: Option<f64>,
    pub packets_out_per_sec: Option<f64>,
}

/// Rate of one monotonic counter across a window.
///
/// Null when either sample is missing, when the counter went backwards (a
/// reset), when the subtraction overflows, or when the window is too short.
/// The counter stays in integer space until after the subtraction.
pub fn counter_rate(prior: Option<i64>, next: Option<i64>, window_secs: i64) -> Option<f64> {
    let prior = prior?;
    let next = next?;
    if window_secs <= MIN_RATE_WINDOW_SECS {
        return None;
    }
    let delta = next.checked_sub(prior)?;
    if delta < 0 {
        return None;
    }
    let rate = delta as f64 / window_secs as f64;
    rate.is_finite().then_some(rate)
}

/// Whole seconds between two host timestamps, truncated.
pub fn window_seconds(prior: DateTime<Utc>, next: DateTime<Utc>) -> i64 {
    (next - prior).num_seconds()
}

/// Derive the persisted rates of a new reading against the most recent prior
/// sample of the same peer.
pub fn derive_rates(
    prior: &stats_sample::Model,
    probe_time: DateTime<Utc>,
    reading: &StatsReading,
) -> DerivedRates {
    let window = window_seconds(prior.timestamp, probe_time);
    DerivedRates {
        packets_in_per_sec: counter_rate(prior.packets_received, reading.packets_received, window),
        packets_out_per_sec: counter_rate(prior.packets_sent, reading.packets_sent, window),
    }
}
