//! k_e0 estimation by the time-to-peak method: given a bolus dose, the
//! observed time of the effect-site peak and the concentration there, find
//! the equilibration constant whose unit-bolus effect curve peaks at that
//! time. At the peak the time derivative of the effect curve vanishes; the
//! residual is that derivative rescaled by the observed peak concentration,
//! so the dose and measurement units cancel out of the root.

use crate::dosing::roots::brent;
use crate::error::{TciError, TciResult};
use crate::models::ModelCoefficients;

/// Bracket for the equilibration constant, per second.
const KE0_BRACKET: (f64, f64) = (1e-5, 1e2);
const KE0_TOLERANCE: f64 = 1e-10;
const MAX_ITERATIONS: usize = 100;

pub fn ke0_from_tpeak(
    coeffs: &ModelCoefficients,
    dose: f64,
    t_peak: f64,
    ce_tpeak: f64,
) -> TciResult<f64> {
    if dose <= 0.0 || t_peak <= 0.0 || ce_tpeak <= 0.0 {
        return Err(TciError::InvalidInput(
            "dose, t_peak and ce_tpeak must be positive".to_string(),
        ));
    }

    let phases = [
        (coeffs.a, coeffs.alpha),
        (coeffs.b, coeffs.beta),
        (coeffs.c, coeffs.gamma),
    ];

    let residual = |ke0: f64| {
        let mut slope = 0.0;
        let mut level = 0.0;
        for (coefficient, rate) in phases {
            if coefficient == 0.0 {
                continue;
            }
            let mut divisor = ke0 - rate;
            if divisor.abs() < 1e-15 {
                divisor = 1e-15;
            }
            let weight = ke0 * coefficient / divisor;
            slope += weight * (rate * (-rate * t_peak).exp() - ke0 * (-ke0 * t_peak).exp());
            level += weight * ((-rate * t_peak).exp() - (-ke0 * t_peak).exp());
        }
        slope * ce_tpeak / level
    };

    let search = brent(
        residual,
        KE0_BRACKET.0,
        KE0_BRACKET.1,
        KE0_TOLERANCE,
        MAX_ITERATIONS,
    )?;
    Ok(search.root)
}
