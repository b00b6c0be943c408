//! Recursive semi-compartmental estimation of the effect-site concentration
//! from a plasma trajectory sampled at 1 s cadence.

/// Effect-site concentration over a 1 Hz plasma series, starting from
/// C_e(0) = 0. Rising plasma steps use a zero-order hold of the previous
/// sample; falling or level steps interpolate log-linearly. A zero previous
/// plasma sample pins the effect site to zero.
pub fn effect_series(plasma: &[f64], ke0: f64) -> Vec<f64> {
    if plasma.is_empty() {
        return Vec::new();
    }
    if ke0 <= 0.0 {
        return vec![0.0; plasma.len()];
    }

    let decay = (-ke0).exp();
    let mut effect = Vec::with_capacity(plasma.len());
    effect.push(0.0);

    for j in 1..plasma.len() {
        let previous = plasma[j - 1];
        let current = plasma[j];

        if previous <= 0.0 {
            effect.push(0.0);
            continue;
        }

        let delta = if current > previous {
            previous * (1.0 - decay)
        } else if current <= 0.0 {
            0.0
        } else {
            let slope = current.ln() - previous.ln();
            if (ke0 + slope).abs() < 1e-12 {
                // slope -> -ke0 limit
                previous * ke0 * decay
            } else {
                previous * ke0 / (ke0 + slope) * (slope.exp() - decay)
            }
        };

        let last = *effect.last().unwrap();
        effect.push(last * decay + delta);
    }

    effect
}
