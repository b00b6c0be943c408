use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dosing::Target;
use crate::error::{TciError, TciResult};
use crate::models::DrugModel;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Pump and solver parameters. All times are in seconds; the rate limit is in
/// ml/hr of the prepared drug solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Drug amount per ml of solution, in the model's concentration unit.
    pub drug_concentration: f64,

    /// Simulation horizon in seconds.
    pub end_time: f64,

    #[serde(default = "default_maintenance_duration")]
    pub maintenance_infusion_duration: f64,

    #[serde(default = "default_maintenance_multiplier")]
    pub maintenance_infusion_multiplier: f64,

    /// Maximum pump rate in ml/hr. -1 disables the cap.
    #[serde(default = "default_max_infusion_rate")]
    pub max_infusion_rate: f64,

    /// Infusions no longer than this count as bolus pushes and are exempt
    /// from the rate cap.
    #[serde(default = "default_bolus_time")]
    pub bolus_time: f64,
}

fn default_maintenance_duration() -> f64 {
    300.0
}

fn default_maintenance_multiplier() -> f64 {
    2.0
}

fn default_max_infusion_rate() -> f64 {
    1200.0
}

fn default_bolus_time() -> f64 {
    20.0
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            drug_concentration: 10.0,
            end_time: 3600.0,
            maintenance_infusion_duration: default_maintenance_duration(),
            maintenance_infusion_multiplier: default_maintenance_multiplier(),
            max_infusion_rate: default_max_infusion_rate(),
            bolus_time: default_bolus_time(),
        }
    }
}

impl PumpConfig {
    pub fn validate(&self) -> TciResult<()> {
        if self.drug_concentration <= 0.0 {
            return Err(TciError::InvalidInput(
                "drug_concentration must be positive".to_string(),
            ));
        }
        if self.end_time <= 0.0 {
            return Err(TciError::InvalidInput("end_time must be positive".to_string()));
        }
        if self.maintenance_infusion_duration < 1.0 {
            return Err(TciError::InvalidInput(
                "maintenance_infusion_duration must be at least 1 s".to_string(),
            ));
        }
        if self.maintenance_infusion_multiplier < 1.0 {
            return Err(TciError::InvalidInput(
                "maintenance_infusion_multiplier must be at least 1".to_string(),
            ));
        }
        if self.max_infusion_rate <= 0.0 && self.max_infusion_rate != -1.0 {
            return Err(TciError::InvalidInput(
                "max_infusion_rate must be positive, or -1 to disable".to_string(),
            ));
        }
        if self.bolus_time < 0.0 {
            return Err(TciError::InvalidInput("bolus_time must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn ml_per_hr(&self, dose_per_sec: f64) -> f64 {
        dose_per_sec * SECONDS_PER_HOUR / self.drug_concentration
    }

    pub fn dose_for_rate(&self, ml_per_hr: f64) -> f64 {
        ml_per_hr * self.drug_concentration / SECONDS_PER_HOUR
    }

    pub fn rate_cap_enabled(&self) -> bool {
        self.max_infusion_rate >= 0.0
    }

    pub fn is_bolus(&self, duration: f64) -> bool {
        duration <= self.bolus_time
    }
}

/// A user-defined infusion row as it appears in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfusionEntry {
    pub start: f64,
    pub dose_per_sec: f64,
    pub duration: f64,
}

/// Bolus observation used to derive k_e0 when the model does not publish
/// one: the time of the effect-site peak and the concentration seen there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpeakCalibration {
    pub dose: f64,
    pub t_peak: f64,
    pub ce_tpeak: f64,
}

impl TpeakCalibration {
    pub fn validate(&self) -> TciResult<()> {
        if self.dose <= 0.0 || self.t_peak <= 0.0 || self.ce_tpeak <= 0.0 {
            return Err(TciError::InvalidInput(
                "tpeak calibration needs positive dose, t_peak and ce_tpeak".to_string(),
            ));
        }
        Ok(())
    }
}

/// A complete simulation scenario: drug model, pump parameters, targets and
/// any user-defined infusions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub model: DrugModel,
    pub pump: PumpConfig,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub infusions: Vec<InfusionEntry>,
    /// Optional stand-in for a missing k_e0.
    #[serde(default)]
    pub tpeak_calibration: Option<TpeakCalibration>,
}

impl ScenarioConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> TciResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScenarioConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TciResult<()> {
        self.model.validate()?;
        self.pump.validate()?;

        for target in &self.targets {
            target.validate()?;
        }

        for infusion in &self.infusions {
            if infusion.start < 0.0 || infusion.duration < 0.0 || infusion.dose_per_sec < 0.0 {
                return Err(TciError::InvalidInput(
                    "user infusion times, durations and doses must not be negative".to_string(),
                ));
            }
        }

        if let Some(calibration) = &self.tpeak_calibration {
            calibration.validate()?;
        }

        Ok(())
    }
}
