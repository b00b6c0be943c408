pub mod roots;
pub mod solver;

use serde::{Deserialize, Serialize};

use crate::error::{TciError, TciResult};

/// Seed for the plasma overshoot search when a target does not pin one.
pub const DEFAULT_CP_LIMIT: f64 = 1.2;

/// Which concentration a target refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetEffect {
    Plasma,
    Effect,
}

/// A concentration target as ordered by the user.
///
/// For plasma targets `duration` is the time over which the target is to be
/// met and the remaining fields are ignored. For effect-site targets
/// `duration` is a lower bound on time-to-target, `cp_limit` the plasma
/// overshoot factor (solved and written back when unset), and
/// `cp_limit_duration` the time allotted to reach the overshoot plateau.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub start: f64,
    pub target: f64,
    #[serde(default)]
    pub duration: f64,
    pub effect: TargetEffect,
    #[serde(default)]
    pub cp_limit: Option<f64>,
    #[serde(default = "default_cp_limit_duration")]
    pub cp_limit_duration: f64,
    #[serde(default)]
    pub ce_bolus_only: bool,
    #[serde(default = "default_true")]
    pub maintenance_infusions: bool,
}

fn default_cp_limit_duration() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

impl Target {
    pub fn new(start: f64, target: f64, duration: f64, effect: TargetEffect) -> Self {
        Self {
            start,
            target,
            duration,
            effect,
            cp_limit: None,
            cp_limit_duration: default_cp_limit_duration(),
            ce_bolus_only: false,
            maintenance_infusions: true,
        }
    }

    pub fn validate(&self) -> TciResult<()> {
        if self.start < 0.0 {
            return Err(TciError::InvalidInput(
                "target start must not be negative".to_string(),
            ));
        }
        if self.target <= 0.0 {
            return Err(TciError::InvalidInput(
                "target concentration must be positive".to_string(),
            ));
        }
        if self.duration < 0.0 {
            return Err(TciError::InvalidInput(
                "target duration must not be negative".to_string(),
            ));
        }
        if let Some(limit) = self.cp_limit {
            if limit <= 0.0 {
                return Err(TciError::InvalidInput("cp_limit must be positive".to_string()));
            }
        }
        if self.cp_limit_duration <= 0.0 {
            return Err(TciError::InvalidInput(
                "cp_limit_duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
