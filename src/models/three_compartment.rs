use std::f64::consts::PI;

use super::{DrugModel, ModelCoefficients};
use crate::error::{TciError, TciResult};

/// Three-compartment coefficients via the trigonometric solution of the
/// depressed cubic whose roots are the disposition constants. Physiological
/// parameter sets give three distinct real positive roots; anything else is
/// rejected as an invalid model.
pub(super) fn derive(model: &DrugModel) -> TciResult<ModelCoefficients> {
    let r = model.rates_per_sec();

    let a0 = r.k10 * r.k21 * r.k31;
    let a1 = r.k10 * r.k31 + r.k21 * r.k31 + r.k21 * r.k13 + r.k10 * r.k21 + r.k31 * r.k12;
    let a2 = r.k10 + r.k12 + r.k13 + r.k21 + r.k31;

    // Depressed form t^3 + p t + q with roots shifted by a2/3
    let p = a1 - a2 * a2 / 3.0;
    let q = 2.0 * a2.powi(3) / 27.0 - a1 * a2 / 3.0 + a0;

    if p >= 0.0 {
        return Err(TciError::InvalidModel(
            "rate constants do not yield three real disposition constants".to_string(),
        ));
    }

    let r1 = (-p.powi(3) / 27.0).sqrt();
    let cos_arg = -q / (2.0 * r1);
    if !(-1.0..=1.0).contains(&cos_arg) {
        return Err(TciError::InvalidModel(
            "rate constants do not yield three real disposition constants".to_string(),
        ));
    }
    let r2 = 2.0 * r1.cbrt();
    let theta = cos_arg.acos() / 3.0;

    let mut roots = [
        -((theta).cos() * r2 - a2 / 3.0),
        -((theta + 2.0 * PI / 3.0).cos() * r2 - a2 / 3.0),
        -((theta + 4.0 * PI / 3.0).cos() * r2 - a2 / 3.0),
    ];
    if roots.iter().any(|root| *root <= 0.0) {
        return Err(TciError::InvalidModel(
            "disposition constants must be positive".to_string(),
        ));
    }
    roots.sort_by(|x, y| y.partial_cmp(x).unwrap());
    let [alpha, beta, gamma] = roots;

    let a = (1.0 / model.v1) * (r.k21 - alpha) / (alpha - beta) * (r.k31 - alpha) / (alpha - gamma);
    let b = (1.0 / model.v1) * (r.k21 - beta) / (beta - alpha) * (r.k31 - beta) / (beta - gamma);
    let c = (1.0 / model.v1) * (r.k21 - gamma) / (gamma - alpha) * (r.k31 - gamma) / (gamma - beta);

    Ok(ModelCoefficients {
        a,
        b,
        c,
        alpha,
        beta,
        gamma,
        v1: model.v1,
        ke0: r.ke0,
    })
}
