use super::{DrugModel, ModelCoefficients};
use crate::error::{TciError, TciResult};

/// Two-compartment coefficients from the quadratic characteristic equation,
/// with optional elimination from the peripheral compartment (k20). The
/// unused gamma phase gets a zero coefficient and a sentinel rate constant
/// of 1.
pub(super) fn derive(model: &DrugModel) -> TciResult<ModelCoefficients> {
    let r = model.rates_per_sec();

    let a1 = r.k21 * r.k10 + r.k12 * r.k20 + r.k10 * r.k20;
    let a2 = r.k12 + r.k21 + r.k10 + r.k20;

    let discriminant = a2 * a2 - 4.0 * a1;
    if discriminant < 0.0 {
        return Err(TciError::InvalidModel(
            "two-compartment rate constants give complex roots".to_string(),
        ));
    }

    let beta = 0.5 * (a2 - discriminant.sqrt());
    if beta <= 0.0 {
        return Err(TciError::InvalidModel(
            "two-compartment disposition constants must be positive".to_string(),
        ));
    }
    let alpha = a1 / beta;

    let a = (alpha - r.k21 - r.k20) / (model.v1 * (alpha - beta));
    let b = (beta - r.k21 - r.k20) / (model.v1 * (beta - alpha));

    Ok(ModelCoefficients {
        a,
        b,
        c: 0.0,
        alpha,
        beta,
        gamma: 1.0,
        v1: model.v1,
        ke0: r.ke0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model(k20: Option<f64>) -> DrugModel {
        DrugModel {
            compartments: 2,
            v1: 12.0,
            k10: 0.1,
            k12: 0.05,
            k21: 0.03,
            k13: 0.0,
            k31: 0.0,
            k20,
            ke0: 0.0,
            concentration_unit: "mg/L".to_string(),
            target_unit: "mg/L".to_string(),
        }
    }

    #[test]
    fn coefficients_sum_to_inverse_volume() {
        let coeffs = ModelCoefficients::derive(&model(None)).unwrap();
        assert_relative_eq!(coeffs.a + coeffs.b, 1.0 / 12.0, epsilon = 1e-9);
        assert_eq!(coeffs.c, 0.0);
    }

    #[test]
    fn roots_satisfy_characteristic_equation() {
        let m = model(None);
        let coeffs = ModelCoefficients::derive(&m).unwrap();
        let r = m.rates_per_sec();
        assert_relative_eq!(coeffs.alpha * coeffs.beta, r.k10 * r.k21, max_relative = 1e-9);
        assert_relative_eq!(
            coeffs.alpha + coeffs.beta,
            r.k10 + r.k12 + r.k21,
            max_relative = 1e-9
        );
        assert!(coeffs.alpha >= coeffs.beta);
        assert!(coeffs.beta > 0.0);
    }

    #[test]
    fn peripheral_elimination_speeds_disposition() {
        let without = ModelCoefficients::derive(&model(None)).unwrap();
        let with = ModelCoefficients::derive(&model(Some(0.02))).unwrap();
        // Extra elimination pathway: both exponents grow.
        assert!(with.alpha > without.alpha);
        assert!(with.beta > without.beta);
        assert_relative_eq!(with.a + with.b, 1.0 / 12.0, epsilon = 1e-9);
    }

    #[test]
    fn ignores_third_compartment_fields() {
        let mut m = model(None);
        m.k13 = 0.7;
        m.k31 = 0.9;
        let reference = ModelCoefficients::derive(&model(None)).unwrap();
        let coeffs = ModelCoefficients::derive(&m).unwrap();
        assert_relative_eq!(coeffs.alpha, reference.alpha, epsilon = 1e-15);
        assert_relative_eq!(coeffs.beta, reference.beta, epsilon = 1e-15);
    }
}
