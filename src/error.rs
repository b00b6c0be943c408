use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TciError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Root not bracketed on [{lo}, {hi}]")]
    RootNotBracketed { lo: f64, hi: f64 },
}

pub type TciResult<T> = Result<T, TciError>;

/// Non-fatal conditions raised during scheduling. The scheduler records these
/// and continues with a deterministic fallback instead of aborting.
#[derive(Debug, Clone, PartialEq)]
pub enum TciWarning {
    /// A root search ran out of iterations; the last iterate was kept.
    NonConvergence { context: &'static str, iterations: usize },

    /// A computed dose exceeded the pump's maximum rate and was clamped or
    /// duration-extended.
    RateCapHit {
        start: f64,
        requested_ml_per_hr: f64,
        max_ml_per_hr: f64,
    },

    /// A user-defined infusion is active inside a targeting window; the
    /// solver accounts for it but overshoot past the target is possible.
    UserInfusionOverlap { infusion_start: f64, target_start: f64 },
}

impl fmt::Display for TciWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TciWarning::NonConvergence { context, iterations } => {
                write!(f, "{} did not converge after {} iterations", context, iterations)
            }
            TciWarning::RateCapHit {
                start,
                requested_ml_per_hr,
                max_ml_per_hr,
            } => write!(
                f,
                "infusion at {:.0} s requested {:.1} ml/hr, capped at {:.1} ml/hr",
                start, requested_ml_per_hr, max_ml_per_hr
            ),
            TciWarning::UserInfusionOverlap {
                infusion_start,
                target_start,
            } => write!(
                f,
                "user infusion at {:.0} s overlaps the targeting window starting at {:.0} s",
                infusion_start, target_start
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_display_is_stable() {
        let w = TciWarning::NonConvergence {
            context: "effect-site limit search",
            iterations: 50,
        };
        assert_eq!(
            w.to_string(),
            "effect-site limit search did not converge after 50 iterations"
        );

        let w = TciWarning::RateCapHit {
            start: 30.0,
            requested_ml_per_hr: 2400.0,
            max_ml_per_hr: 1200.0,
        };
        assert_eq!(
            w.to_string(),
            "infusion at 30 s requested 2400.0 ml/hr, capped at 1200.0 ml/hr"
        );
    }
}
