use super::{DrugModel, ModelCoefficients};
use crate::error::TciResult;

/// Single-compartment coefficients: a pure mono-exponential with rate k10.
/// The unused beta and gamma phases get a zero coefficient and a sentinel
/// rate constant of 1 so the shared evaluation code never divides by zero.
pub(super) fn derive(model: &DrugModel) -> TciResult<ModelCoefficients> {
    let rates = model.rates_per_sec();

    Ok(ModelCoefficients {
        a: 1.0 / model.v1,
        b: 0.0,
        c: 0.0,
        alpha: rates.k10,
        beta: 1.0,
        gamma: 1.0,
        v1: model.v1,
        ke0: rates.ke0,
    })
}
