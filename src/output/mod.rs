use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::dosing::TargetEffect;
use crate::error::TciResult;
use crate::simulation::{Pump, TrajectoryPoint};

#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub end_time: f64,
    pub infusion_count: usize,
    pub total_dose: f64,
    pub cp_max: f64,
    pub ce_max: f64,
    pub warnings: Vec<String>,
}

impl SimulationSummary {
    pub fn from_run(pump: &Pump, trajectory: &[TrajectoryPoint]) -> Self {
        let total_dose = pump
            .infusion_list()
            .iter()
            .map(|infusion| infusion.dose_per_sec * infusion.duration)
            .sum();
        Self {
            end_time: pump.config().end_time,
            infusion_count: pump.infusion_list().len(),
            total_dose,
            cp_max: trajectory.iter().map(|point| point.cp).fold(0.0, f64::max),
            ce_max: trajectory.iter().map(|point| point.ce).fold(0.0, f64::max),
            warnings: pump.warnings().iter().map(|w| w.to_string()).collect(),
        }
    }
}

pub fn save_results<P: AsRef<Path>>(
    pump: &Pump,
    trajectory: &[TrajectoryPoint],
    output_dir: P,
) -> TciResult<()> {
    let output_path = output_dir.as_ref();

    save_infusions(pump, &output_path.join("infusions.csv"))?;
    save_user_infusions(pump, &output_path.join("user_infusions.csv"))?;
    save_rates(pump, &output_path.join("rates.csv"))?;
    save_trajectory(trajectory, &output_path.join("trajectory.csv"))?;
    save_targets(pump, &output_path.join("targets.csv"))?;

    let summary = SimulationSummary::from_run(pump, trajectory);
    save_summary(&summary, &output_path.join("summary.json"))?;

    info!("All results saved to {:?}", output_path);
    Ok(())
}

fn save_infusions<P: AsRef<Path>>(pump: &Pump, path: P) -> TciResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["START", "DOSE_PER_SEC", "DURATION", "END", "RATE_ML_HR"])?;
    for infusion in pump.infusion_list() {
        writer.write_record(&[
            infusion.start.to_string(),
            infusion.dose_per_sec.to_string(),
            infusion.duration.to_string(),
            infusion.end.to_string(),
            pump.config().ml_per_hr(infusion.dose_per_sec).to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_user_infusions<P: AsRef<Path>>(pump: &Pump, path: P) -> TciResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["START", "DOSE_PER_SEC", "DURATION", "END"])?;
    for infusion in pump.user_infusion_list() {
        writer.write_record(&[
            infusion.start.to_string(),
            infusion.dose_per_sec.to_string(),
            infusion.duration.to_string(),
            infusion.end.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_rates<P: AsRef<Path>>(pump: &Pump, path: P) -> TciResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["START", "END", "RATE_ML_HR"])?;
    for step in pump.infusion_rates() {
        writer.write_record(&[
            step.start.to_string(),
            step.end.to_string(),
            step.ml_per_hr.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Weight-normalised dosing steps, written when the caller supplies a
/// patient weight.
pub fn save_dose_per_weight<P: AsRef<Path>>(
    pump: &Pump,
    weight_kg: f64,
    output_dir: P,
) -> TciResult<()> {
    let path = output_dir.as_ref().join("dose_per_weight.csv");
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["START", "END", "DOSE_PER_KG", "DOSE_PER_KG_HR"])?;
    for step in pump.dose_per_weight(weight_kg)? {
        writer.write_record(&[
            step.start.to_string(),
            step.end.to_string(),
            step.dose_per_kg.to_string(),
            step.dose_per_kg_per_hr.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_trajectory<P: AsRef<Path>>(trajectory: &[TrajectoryPoint], path: P) -> TciResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["TIME", "CP", "CE"])?;
    for point in trajectory {
        writer.write_record(&[
            point.time.to_string(),
            point.cp.to_string(),
            point.ce.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_targets<P: AsRef<Path>>(pump: &Pump, path: P) -> TciResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "START",
        "TARGET",
        "DURATION",
        "EFFECT",
        "CP_LIMIT",
        "CP_LIMIT_DURATION",
        "CE_BOLUS_ONLY",
    ])?;
    for target in pump.target_concentrations() {
        let effect = match target.effect {
            TargetEffect::Plasma => "plasma",
            TargetEffect::Effect => "effect",
        };
        writer.write_record(&[
            target.start.to_string(),
            target.target.to_string(),
            target.duration.to_string(),
            effect.to_string(),
            target.cp_limit.map(|v| v.to_string()).unwrap_or_default(),
            target.cp_limit_duration.to_string(),
            target.ce_bolus_only.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_summary<P: AsRef<Path>>(summary: &SimulationSummary, path: P) -> TciResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

/// Generate a human-readable run report alongside the data files.
pub fn generate_report<P: AsRef<Path>>(
    pump: &Pump,
    trajectory: &[TrajectoryPoint],
    output_dir: P,
) -> TciResult<()> {
    let output_path = output_dir.as_ref();
    let report_path = output_path.join("simulation_report.md");

    let summary = SimulationSummary::from_run(pump, trajectory);
    let warnings = if summary.warnings.is_empty() {
        "None.".to_string()
    } else {
        summary
            .warnings
            .iter()
            .map(|w| format!("- {}", w))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let report_content = format!(
        r#"# Target-Controlled Infusion Simulation Report

Generated: {}

## Run Overview
- **Simulated time**: {:.0} s
- **Targets**: {}
- **Scheduled infusions**: {}
- **Total dose delivered**: {:.2} ({})

## Concentrations
- **Plasma peak**: {:.3} {}
- **Effect-site peak**: {:.3} {}

## Warnings
{}

## Files Generated
- `infusions.csv`: the complete infusion schedule with pump rates
- `trajectory.csv`: plasma and effect-site concentrations at 1 s cadence
- `targets.csv`: target rows with solved overshoot factors
- `summary.json`: run statistics
"#,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        summary.end_time,
        pump.target_concentrations().len(),
        summary.infusion_count,
        summary.total_dose,
        pump.model().concentration_unit,
        summary.cp_max,
        pump.model().concentration_unit,
        summary.ce_max,
        pump.model().concentration_unit,
        warnings,
    );

    std::fs::write(report_path, report_content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PumpConfig;
    use crate::dosing::Target;
    use crate::models::DrugModel;

    fn small_pump() -> Pump {
        let model = DrugModel {
            compartments: 1,
            v1: 10.0,
            k10: 0.1,
            k12: 0.0,
            k21: 0.0,
            k13: 0.0,
            k31: 0.0,
            k20: None,
            ke0: 0.3,
            concentration_unit: "mg/L".to_string(),
            target_unit: "mg/L".to_string(),
        };
        let config = PumpConfig {
            drug_concentration: 10.0,
            end_time: 120.0,
            ..PumpConfig::default()
        };
        Pump::new(model, config).unwrap()
    }

    #[test]
    fn summary_counts_the_schedule() {
        let mut pump = small_pump();
        let mut target = Target::new(0.0, 2.0, 10.0, TargetEffect::Plasma);
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();
        let trajectory = pump.run().unwrap();

        let summary = SimulationSummary::from_run(&pump, &trajectory);
        assert_eq!(summary.infusion_count, 1);
        assert!(summary.total_dose > 0.0);
        assert!(summary.cp_max >= 2.0 - 0.05);
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn writes_all_output_files() {
        let mut pump = small_pump();
        let mut target = Target::new(0.0, 2.0, 10.0, TargetEffect::Plasma);
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();
        let trajectory = pump.run().unwrap();

        let dir = std::env::temp_dir().join("tci_simulation_output_test");
        std::fs::create_dir_all(&dir).unwrap();
        save_results(&pump, &trajectory, &dir).unwrap();
        save_dose_per_weight(&pump, 70.0, &dir).unwrap();
        generate_report(&pump, &trajectory, &dir).unwrap();

        for name in [
            "infusions.csv",
            "user_infusions.csv",
            "rates.csv",
            "trajectory.csv",
            "targets.csv",
            "summary.json",
            "dose_per_weight.csv",
            "simulation_report.md",
        ] {
            assert!(dir.join(name).exists(), "missing {}", name);
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
