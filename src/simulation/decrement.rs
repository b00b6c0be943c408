//! Decrement-time queries: how long until the plasma or effect-site
//! concentration falls to a given level once dosing stops at the query time.

use crate::models::{Infusion, ModelCoefficients};

/// A decrement target of 0 can never be met by exponential decay; it is
/// approximated by this floor.
const MIN_DECREMENT_TARGET: f64 = 0.1;

/// Seconds from `query_time` until C_p decays to `target`, with every
/// infusion cut off at `query_time`.
pub fn plasma_decrement_time(
    coeffs: &ModelCoefficients,
    infusions: &[Infusion],
    query_time: f64,
    target: f64,
) -> f64 {
    let target = target.max(MIN_DECREMENT_TARGET);
    let truncated = truncate_at(infusions, query_time);

    let mut cursor = query_time;
    while coeffs.plasma_at(&truncated, cursor) > target {
        cursor += 1.0;
    }
    cursor - query_time
}

/// Seconds from `query_time` until C_e decays to `target`, with every
/// infusion cut off at `query_time`. The effect site is simulated from t = 0
/// so its state at the query time reflects the whole history.
pub fn effect_decrement_time(
    coeffs: &ModelCoefficients,
    infusions: &[Infusion],
    query_time: f64,
    target: f64,
) -> f64 {
    let target = target.max(MIN_DECREMENT_TARGET);
    let truncated = truncate_at(infusions, query_time);

    let first = query_time.floor() as usize + 1;
    let mut horizon = (query_time + 3600.0).ceil() as usize;
    loop {
        let plasma = coeffs.plasma_series(&truncated, horizon);
        let effect = coeffs.effect_series(&plasma);
        for (t, value) in effect.iter().enumerate().skip(first) {
            if *value <= target {
                return t as f64 - query_time;
            }
        }
        horizon *= 2;
    }
}

/// Copy of the infusion list with anything crossing `at` ending there and
/// anything starting later dropped.
fn truncate_at(infusions: &[Infusion], at: f64) -> Vec<Infusion> {
    infusions
        .iter()
        .filter(|infusion| infusion.start < at)
        .map(|infusion| {
            if infusion.end > at {
                Infusion::new(infusion.start, infusion.dose_per_sec, at - infusion.start)
            } else {
                infusion.clone()
            }
        })
        .collect()
}
