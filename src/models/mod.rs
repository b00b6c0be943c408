pub mod effect_site;
pub mod one_compartment;
pub mod three_compartment;
pub mod two_compartment;

use serde::{Deserialize, Serialize};

use crate::error::{TciError, TciResult};

pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// Compartmental drug model as published: volumes in litres, micro-rate
/// constants in per-minute units. Constants are converted to per-second on
/// coefficient derivation. Anthropometric metadata stays with whatever built
/// this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugModel {
    /// 1, 2 or 3.
    pub compartments: u8,

    /// Central compartment volume (L).
    pub v1: f64,

    /// Elimination rate constant (per minute).
    pub k10: f64,

    #[serde(default)]
    pub k12: f64,
    #[serde(default)]
    pub k21: f64,
    #[serde(default)]
    pub k13: f64,
    #[serde(default)]
    pub k31: f64,

    /// Optional elimination from the second compartment (per minute).
    #[serde(default)]
    pub k20: Option<f64>,

    /// Effect-compartment equilibration constant (per minute). 0 when the
    /// model carries no effect site.
    #[serde(default)]
    pub ke0: f64,

    #[serde(default = "default_unit")]
    pub concentration_unit: String,
    #[serde(default = "default_unit")]
    pub target_unit: String,
}

fn default_unit() -> String {
    "ug/ml".to_string()
}

impl DrugModel {
    pub fn validate(&self) -> TciResult<()> {
        if ![1, 2, 3].contains(&self.compartments) {
            return Err(TciError::InvalidModel(format!(
                "number of compartments must be 1, 2 or 3, got {}",
                self.compartments
            )));
        }
        if self.v1 <= 0.0 {
            return Err(TciError::InvalidModel("v1 must be positive".to_string()));
        }
        for (name, value) in [
            ("k10", self.k10),
            ("k12", self.k12),
            ("k21", self.k21),
            ("k13", self.k13),
            ("k31", self.k31),
            ("k20", self.k20.unwrap_or(0.0)),
            ("ke0", self.ke0),
        ] {
            if value < 0.0 {
                return Err(TciError::InvalidModel(format!("{} must not be negative", name)));
            }
        }
        Ok(())
    }

    /// Micro-rate constants converted to per-second units.
    pub(crate) fn rates_per_sec(&self) -> RateConstants {
        RateConstants {
            k10: self.k10 / SECONDS_PER_MINUTE,
            k12: self.k12 / SECONDS_PER_MINUTE,
            k21: self.k21 / SECONDS_PER_MINUTE,
            k13: self.k13 / SECONDS_PER_MINUTE,
            k31: self.k31 / SECONDS_PER_MINUTE,
            k20: self.k20.unwrap_or(0.0) / SECONDS_PER_MINUTE,
            ke0: self.ke0 / SECONDS_PER_MINUTE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RateConstants {
    pub k10: f64,
    pub k12: f64,
    pub k21: f64,
    pub k13: f64,
    pub k31: f64,
    pub k20: f64,
    pub ke0: f64,
}

/// A timed infusion. A bolus is not a distinct type: it is an infusion whose
/// duration does not exceed the configured bolus threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infusion {
    pub start: f64,
    pub dose_per_sec: f64,
    pub duration: f64,
    pub end: f64,
}

impl Infusion {
    pub fn new(start: f64, dose_per_sec: f64, duration: f64) -> Self {
        Self {
            start,
            dose_per_sec,
            duration,
            end: start + duration,
        }
    }
}

/// Phase coefficients (A, B, C) and rate constants (alpha, beta, gamma) of
/// the analytic bolus response, all in per-second units. Unused phases carry
/// a zero coefficient and a sentinel rate constant of 1.
#[derive(Debug, Clone)]
pub struct ModelCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub v1: f64,
    /// Effect-compartment equilibration constant, per second.
    pub ke0: f64,
}

impl ModelCoefficients {
    pub fn derive(model: &DrugModel) -> TciResult<Self> {
        model.validate()?;
        match model.compartments {
            1 => one_compartment::derive(model),
            2 => two_compartment::derive(model),
            3 => three_compartment::derive(model),
            n => Err(TciError::InvalidModel(format!(
                "unsupported compartment count: {}",
                n
            ))),
        }
    }

    /// Unit-bolus plasma response f(t).
    pub fn bolus_response(&self, t: f64) -> f64 {
        self.a * (-self.alpha * t).exp()
            + self.b * (-self.beta * t).exp()
            + self.c * (-self.gamma * t).exp()
    }

    /// Analytic integral of the unit-bolus response over [from, to].
    pub fn response_integral(&self, from: f64, to: f64) -> f64 {
        self.a / self.alpha * ((-self.alpha * from).exp() - (-self.alpha * to).exp())
            + self.b / self.beta * ((-self.beta * from).exp() - (-self.beta * to).exp())
            + self.c / self.gamma * ((-self.gamma * from).exp() - (-self.gamma * to).exp())
    }

    /// Plasma contribution of a single infusion at observation time t.
    pub fn infusion_contribution(&self, infusion: &Infusion, t: f64) -> f64 {
        if t < infusion.start || infusion.dose_per_sec == 0.0 {
            return 0.0;
        }

        let elapsed = t - infusion.start;
        if elapsed <= infusion.duration {
            // Still infusing
            let term1 = self.a / self.alpha * (1.0 - (-self.alpha * elapsed).exp());
            let term2 = self.b / self.beta * (1.0 - (-self.beta * elapsed).exp());
            let term3 = self.c / self.gamma * (1.0 - (-self.gamma * elapsed).exp());
            infusion.dose_per_sec * (term1 + term2 + term3)
        } else {
            // Level reached at the end of the infusion, decayed since
            let diff = t - infusion.end;
            let term1 = self.a / self.alpha
                * (1.0 - (-self.alpha * infusion.duration).exp())
                * (-self.alpha * diff).exp();
            let term2 = self.b / self.beta
                * (1.0 - (-self.beta * infusion.duration).exp())
                * (-self.beta * diff).exp();
            let term3 = self.c / self.gamma
                * (1.0 - (-self.gamma * infusion.duration).exp())
                * (-self.gamma * diff).exp();
            infusion.dose_per_sec * (term1 + term2 + term3)
        }
    }

    /// Total plasma concentration at t over a list of infusions
    /// (superposition).
    pub fn plasma_at(&self, infusions: &[Infusion], t: f64) -> f64 {
        infusions
            .iter()
            .map(|infusion| self.infusion_contribution(infusion, t))
            .sum::<f64>()
            .max(0.0)
    }

    /// Plasma concentration sampled at 1 s cadence over [0, samples).
    pub fn plasma_series(&self, infusions: &[Infusion], samples: usize) -> Vec<f64> {
        (0..samples)
            .map(|t| self.plasma_at(infusions, t as f64))
            .collect()
    }

    /// Effect-site concentration over a 1 Hz plasma series.
    pub fn effect_series(&self, plasma: &[f64]) -> Vec<f64> {
        effect_site::effect_series(plasma, self.ke0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn marsh_70kg() -> DrugModel {
        DrugModel {
            compartments: 3,
            v1: 0.228 * 70.0,
            k10: 0.119,
            k12: 0.112,
            k21: 0.055,
            k13: 0.0419,
            k31: 0.0033,
            k20: None,
            ke0: 0.26,
            concentration_unit: "ug/ml".to_string(),
            target_unit: "ug/ml".to_string(),
        }
    }

    #[test]
    fn invalid_compartment_count_rejected() {
        let mut model = marsh_70kg();
        model.compartments = 4;
        assert!(matches!(
            ModelCoefficients::derive(&model),
            Err(TciError::InvalidModel(_))
        ));
    }

    #[test]
    fn negative_rate_constant_rejected() {
        let mut model = marsh_70kg();
        model.k21 = -0.01;
        assert!(model.validate().is_err());
    }

    #[test]
    fn plasma_starts_at_zero() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let infusion = Infusion::new(0.0, 5.0, 10.0);
        assert_eq!(coeffs.plasma_at(&[infusion], 0.0), 0.0);
    }

    #[test]
    fn no_contribution_before_start() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let infusion = Infusion::new(100.0, 5.0, 10.0);
        assert_eq!(coeffs.plasma_at(&[infusion], 50.0), 0.0);
    }

    #[test]
    fn superposition_over_disjoint_lists() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let first = Infusion::new(0.0, 4.0, 30.0);
        let second = Infusion::new(120.0, 2.0, 60.0);

        for t in [10.0, 60.0, 150.0, 300.0, 900.0] {
            let combined = coeffs.plasma_at(&[first.clone(), second.clone()], t);
            let split = coeffs.plasma_at(&[first.clone()], t) + coeffs.plasma_at(&[second.clone()], t);
            assert_relative_eq!(combined, split, epsilon = 1e-12);
        }
    }

    #[test]
    fn concentration_decays_after_infusion_ends() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let infusion = Infusion::new(0.0, 5.0, 10.0);
        let infusions = [infusion];

        let mut previous = coeffs.plasma_at(&infusions, 10.0);
        for t in [30.0, 60.0, 300.0, 1200.0] {
            let current = coeffs.plasma_at(&infusions, t);
            assert!(current < previous, "expected decay at t={}", t);
            assert!(current > 0.0);
            previous = current;
        }
    }

    #[test]
    fn response_integral_matches_increment_phase() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let infusion = Infusion::new(0.0, 1.0, 60.0);
        // At the end of a unit-rate infusion the accumulated level equals the
        // integral of the bolus response over the infusion.
        assert_relative_eq!(
            coeffs.plasma_at(&[infusion], 60.0),
            coeffs.response_integral(0.0, 60.0),
            max_relative = 1e-12
        );
    }

    #[test]
    fn response_integral_against_quadrature() {
        let coeffs = ModelCoefficients::derive(&marsh_70kg()).unwrap();
        let (from, to) = (0.0, 120.0);
        let n = 200_000;
        let h = (to - from) / n as f64;
        let mut sum = 0.5 * (coeffs.bolus_response(from) + coeffs.bolus_response(to));
        for i in 1..n {
            sum += coeffs.bolus_response(from + i as f64 * h);
        }
        assert_relative_eq!(coeffs.response_integral(from, to), sum * h, max_relative = 1e-6);
    }
}
