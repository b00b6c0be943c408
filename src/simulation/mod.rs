pub mod decrement;
pub mod keo;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::PumpConfig;
use crate::dosing::solver::DosingSolver;
use crate::dosing::{Target, TargetEffect};
use crate::error::{TciError, TciResult, TciWarning};
use crate::models::{DrugModel, Infusion, ModelCoefficients};

/// One 1 Hz sample of the simulated concentrations.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryPoint {
    pub time: f64,
    pub cp: f64,
    pub ce: f64,
}

/// An ml/hr pump-rate step over the frozen schedule.
#[derive(Debug, Clone, Serialize)]
pub struct RateStep {
    pub start: f64,
    pub end: f64,
    pub ml_per_hr: f64,
}

/// A weight-normalised dosing step over the frozen schedule.
#[derive(Debug, Clone, Serialize)]
pub struct DoseStep {
    pub start: f64,
    pub end: f64,
    /// Total drug over the step per kilogram.
    pub dose_per_kg: f64,
    /// Delivery rate per kilogram per hour.
    pub dose_per_kg_per_hr: f64,
}

/// The scheduler: owns the target list and the growing infusion schedule,
/// drives the dosing solver over the targets in time order, and produces the
/// simulated trajectory on demand.
pub struct Pump {
    model: DrugModel,
    coeffs: ModelCoefficients,
    config: PumpConfig,
    targets: Vec<Target>,
    user_infusions: Vec<Infusion>,
    infusions: Vec<Infusion>,
    warnings: Vec<TciWarning>,
}

impl Pump {
    pub fn new(model: DrugModel, config: PumpConfig) -> TciResult<Self> {
        config.validate()?;
        let coeffs = ModelCoefficients::derive(&model)?;

        Ok(Self {
            model,
            coeffs,
            config,
            targets: Vec::new(),
            user_infusions: Vec::new(),
            infusions: Vec::new(),
            warnings: Vec::new(),
        })
    }

    pub fn model(&self) -> &DrugModel {
        &self.model
    }

    pub fn coefficients(&self) -> &ModelCoefficients {
        &self.coeffs
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Queue a concentration target. Effect-site targets need a model with a
    /// positive k_e0.
    pub fn add_target(&mut self, target: Target) -> TciResult<()> {
        target.validate()?;
        if target.effect == TargetEffect::Effect && self.model.ke0 <= 0.0 {
            return Err(TciError::InvalidInput(
                "effect-site targets need a model with a positive ke0".to_string(),
            ));
        }
        self.targets.push(target);
        Ok(())
    }

    /// Queue a user-defined infusion. These are kept verbatim in the
    /// schedule; the solver accounts for them but never corrects them.
    pub fn add_infusion(&mut self, start: f64, dose_per_sec: f64, duration: f64) -> TciResult<()> {
        if start < 0.0 || dose_per_sec < 0.0 || duration < 0.0 {
            return Err(TciError::InvalidInput(
                "infusion start, dose and duration must not be negative".to_string(),
            ));
        }
        self.user_infusions.push(Infusion::new(start, dose_per_sec, duration));
        Ok(())
    }

    pub fn infusion_list(&self) -> &[Infusion] {
        &self.infusions
    }

    pub fn user_infusion_list(&self) -> &[Infusion] {
        &self.user_infusions
    }

    /// Targets as queued; after scheduling, solved overshoot factors have
    /// been written back to `cp_limit`.
    pub fn target_concentrations(&self) -> &[Target] {
        &self.targets
    }

    /// Warnings surfaced by the last scheduling run.
    pub fn warnings(&self) -> &[TciWarning] {
        &self.warnings
    }

    /// Build the infusion schedule for the queued targets. Rebuilds from
    /// scratch on every call, so repeated calls give identical schedules.
    pub fn generate_infusions(&mut self) -> TciResult<&[Infusion]> {
        self.warnings.clear();
        self.infusions.clear();
        self.infusions.extend(self.user_infusions.iter().cloned());

        // Ascending start, ties kept in insertion order.
        let mut order: Vec<usize> = (0..self.targets.len()).collect();
        order.sort_by(|&i, &j| {
            self.targets[i]
                .start
                .partial_cmp(&self.targets[j].start)
                .unwrap()
        });

        // Clone the shared inputs so the solver does not borrow self.
        let coeffs = self.coeffs.clone();
        let config = self.config.clone();
        let mut solver = DosingSolver::new(&coeffs, &config);

        for (position, &index) in order.iter().enumerate() {
            let target = self.targets[index].clone();
            info!(
                "solving target {:.2} ({:?}) at {:.0} s",
                target.target, target.effect, target.start
            );
            self.check_user_overlap(&target);

            let reached = match target.effect {
                TargetEffect::Plasma => {
                    let infusion = solver.plasma_infusion(
                        &self.infusions,
                        target.target,
                        target.start,
                        target.duration,
                    );
                    let end = infusion.end;
                    self.infusions.push(infusion);
                    end
                }
                TargetEffect::Effect if target.ce_bolus_only => {
                    let solution = solver.effect_bolus_solution(&self.infusions, &target);
                    self.targets[index].cp_limit = Some(solution.limit);
                    let end = solution.bolus.end;
                    self.infusions.push(solution.bolus);
                    end
                }
                TargetEffect::Effect => {
                    let (limit, bolus) = match target.cp_limit {
                        Some(limit) => {
                            let bolus = solver.plasma_infusion(
                                &self.infusions,
                                target.target * limit,
                                target.start,
                                target.cp_limit_duration,
                            );
                            (limit, bolus)
                        }
                        None => {
                            let solution = solver.effect_bolus_solution(&self.infusions, &target);
                            self.targets[index].cp_limit = Some(solution.limit);
                            (solution.limit, solution.bolus)
                        }
                    };
                    let (plateau, coast) =
                        solver.effect_plateau(&self.infusions, &target, limit, &bolus);
                    let end = coast.end;
                    self.infusions.push(bolus);
                    self.infusions.push(plateau);
                    self.infusions.push(coast);
                    end
                }
            };
            debug!("target at {:.0} s reached at {:.0} s", target.start, reached);

            if target.maintenance_infusions {
                let until = order
                    .get(position + 1)
                    .map(|&next| self.targets[next].start)
                    .unwrap_or(self.config.end_time);
                if until > reached {
                    solver.maintenance_schedule(&mut self.infusions, target.target, reached, until);
                }
            }
        }

        self.warnings.extend(solver.into_warnings());
        for warning in &self.warnings {
            warn!("{}", warning);
        }

        self.infusions
            .sort_by(|x, y| x.start.partial_cmp(&y.start).unwrap());
        Ok(&self.infusions)
    }

    /// Generate the schedule and simulate (C_p, C_e) at 1 s cadence over
    /// [0, end_time).
    pub fn run(&mut self) -> TciResult<Vec<TrajectoryPoint>> {
        self.generate_infusions()?;

        let samples = self.config.end_time.ceil() as usize;
        let plasma = self.coeffs.plasma_series(&self.infusions, samples);
        let effect = self.coeffs.effect_series(&plasma);

        Ok(plasma
            .into_iter()
            .zip(effect)
            .enumerate()
            .map(|(t, (cp, ce))| TrajectoryPoint {
                time: t as f64,
                cp,
                ce,
            })
            .collect())
    }

    /// Seconds until plasma concentration decays to `target`, counting from
    /// `query_time` with all infusions cut off there.
    pub fn plasma_decrement_time(&self, query_time: f64, target: f64) -> f64 {
        decrement::plasma_decrement_time(&self.coeffs, &self.infusions, query_time, target)
    }

    /// Seconds until the effect-site concentration decays to `target`,
    /// counting from `query_time` with all infusions cut off there.
    pub fn effect_decrement_time(&self, query_time: f64, target: f64) -> f64 {
        decrement::effect_decrement_time(&self.coeffs, &self.infusions, query_time, target)
    }

    /// Pump-rate view of the frozen schedule.
    pub fn infusion_rates(&self) -> Vec<RateStep> {
        self.infusions
            .iter()
            .map(|infusion| RateStep {
                start: infusion.start,
                end: infusion.end,
                ml_per_hr: self.config.ml_per_hr(infusion.dose_per_sec),
            })
            .collect()
    }

    /// Weight-normalised view of the frozen schedule.
    pub fn dose_per_weight(&self, weight_kg: f64) -> TciResult<Vec<DoseStep>> {
        if weight_kg <= 0.0 {
            return Err(TciError::InvalidInput("weight must be positive".to_string()));
        }
        Ok(self
            .infusions
            .iter()
            .map(|infusion| DoseStep {
                start: infusion.start,
                end: infusion.end,
                dose_per_kg: infusion.dose_per_sec * infusion.duration / weight_kg,
                dose_per_kg_per_hr: infusion.dose_per_sec * 3600.0 / weight_kg,
            })
            .collect())
    }

    fn check_user_overlap(&mut self, target: &Target) {
        let window_end = target.start + target.duration.max(target.cp_limit_duration);
        for user in &self.user_infusions {
            if user.dose_per_sec > 0.0 && user.start < window_end && user.end > target.start {
                self.warnings.push(TciWarning::UserInfusionOverlap {
                    infusion_start: user.start,
                    target_start: target.start,
                });
            }
        }
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

    fn pump() -> Pump {
        let config = PumpConfig {
            drug_concentration: 10.0,
            end_time: 3600.0,
            ..PumpConfig::default()
        };
        Pump::new(marsh_70kg(), config).unwrap()
    }

    #[test]
    fn plasma_target_single_infusion() {
        let mut pump = pump();
        let mut target = Target::new(0.0, 4.0, 10.0, TargetEffect::Plasma);
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();
        pump.generate_infusions().unwrap();

        let infusions = pump.infusion_list();
        assert_eq!(infusions.len(), 1);
        assert_eq!(infusions[0].start, 0.0);
        assert_eq!(infusions[0].duration, 10.0);

        let cp = pump.coefficients().plasma_at(infusions, 10.0);
        assert_relative_eq!(cp, 4.0, epsilon = 0.01);
    }

    #[test]
    fn effect_target_bolus_only() {
        let mut pump = pump();
        let mut target = Target::new(0.0, 4.0, 10.0, TargetEffect::Effect);
        target.ce_bolus_only = true;
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();

        let trajectory = pump.run().unwrap();
        assert_eq!(pump.infusion_list().len(), 1);
        assert!(pump.config().is_bolus(pump.infusion_list()[0].duration));

        let solved = pump.target_concentrations()[0].cp_limit.unwrap();
        assert!(solved > 1.0);

        let reached = trajectory
            .iter()
            .find(|point| (point.ce - 4.0).abs() <= 0.02)
            .map(|point| point.time);
        assert!(reached.is_some(), "effect target never reached");
        assert!(reached.unwrap() > pump.infusion_list()[0].end);
    }

    #[test]
    fn effect_target_revised_method() {
        let mut pump = pump();
        let mut target = Target::new(0.0, 4.0, 10.0, TargetEffect::Effect);
        target.cp_limit = Some(1.5);
        target.cp_limit_duration = 20.0;
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();

        let trajectory = pump.run().unwrap();
        let infusions = pump.infusion_list();
        assert_eq!(infusions.len(), 3);
        assert_eq!(infusions[2].dose_per_sec, 0.0);

        let ce_peak = trajectory.iter().map(|p| p.ce).fold(0.0, f64::max);
        let cp_peak = trajectory.iter().map(|p| p.cp).fold(0.0, f64::max);
        assert_relative_eq!(ce_peak, 4.0, epsilon = 0.02);
        assert!(cp_peak <= 6.01);
    }

    #[test]
    fn maintenance_cadence_doubles_until_end_time() {
        let mut pump = pump();
        pump.add_target(Target::new(0.0, 4.0, 10.0, TargetEffect::Plasma))
            .unwrap();
        pump.generate_infusions().unwrap();

        let durations: Vec<f64> = pump.infusion_list()[1..]
            .iter()
            .map(|infusion| infusion.duration)
            .collect();
        assert_eq!(durations, vec![300.0, 600.0, 1200.0, 1490.0]);
        assert_eq!(pump.infusion_list().last().unwrap().end, 3600.0);
    }

    #[test]
    fn trajectory_starts_at_zero_and_stays_non_negative() {
        let mut pump = pump();
        pump.add_target(Target::new(0.0, 4.0, 10.0, TargetEffect::Plasma))
            .unwrap();
        let trajectory = pump.run().unwrap();

        assert_eq!(trajectory.len(), 3600);
        assert_eq!(trajectory[0].cp, 0.0);
        assert_eq!(trajectory[0].ce, 0.0);
        assert!(trajectory.iter().all(|point| point.cp >= 0.0 && point.ce >= 0.0));
    }

    #[test]
    fn generate_infusions_is_idempotent() {
        let mut pump = pump();
        let mut effect = Target::new(0.0, 4.0, 10.0, TargetEffect::Effect);
        effect.ce_bolus_only = true;
        pump.add_target(effect).unwrap();
        pump.add_target(Target::new(1800.0, 2.0, 10.0, TargetEffect::Plasma))
            .unwrap();

        let first: Vec<Infusion> = pump.generate_infusions().unwrap().to_vec();
        let second: Vec<Infusion> = pump.generate_infusions().unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn schedule_is_monotone_and_well_formed() {
        let mut pump = pump();
        pump.add_infusion(0.0, 1.0, 30.0).unwrap();
        pump.add_target(Target::new(60.0, 3.0, 10.0, TargetEffect::Plasma))
            .unwrap();
        pump.add_target(Target::new(1200.0, 1.5, 10.0, TargetEffect::Plasma))
            .unwrap();
        pump.generate_infusions().unwrap();

        let infusions = pump.infusion_list();
        for infusion in infusions {
            assert!(infusion.dose_per_sec >= 0.0);
            assert!(infusion.duration >= 0.0);
            assert_relative_eq!(infusion.end, infusion.start + infusion.duration, epsilon = 1e-9);
        }
        for pair in infusions.windows(2) {
            assert!(pair[1].start >= pair[0].start);
        }
    }

    #[test]
    fn user_infusion_overlap_is_warned_not_corrected() {
        let mut pump = pump();
        pump.add_infusion(0.0, 2.0, 30.0).unwrap();
        let mut target = Target::new(5.0, 4.0, 10.0, TargetEffect::Plasma);
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();
        pump.generate_infusions().unwrap();

        assert!(pump
            .warnings()
            .iter()
            .any(|w| matches!(w, TciWarning::UserInfusionOverlap { .. })));
        // the user row is still in the schedule, untouched
        assert!(pump
            .infusion_list()
            .iter()
            .any(|infusion| infusion.start == 0.0 && infusion.dose_per_sec == 2.0));
    }

    #[test]
    fn effect_target_requires_ke0() {
        let mut model = marsh_70kg();
        model.ke0 = 0.0;
        let config = PumpConfig {
            drug_concentration: 10.0,
            end_time: 600.0,
            ..PumpConfig::default()
        };
        let mut pump = Pump::new(model, config).unwrap();
        let result = pump.add_target(Target::new(0.0, 4.0, 10.0, TargetEffect::Effect));
        assert!(matches!(result, Err(TciError::InvalidInput(_))));
    }

    #[test]
    fn second_target_accounts_for_the_first() {
        let mut pump = pump();
        let mut first = Target::new(0.0, 4.0, 10.0, TargetEffect::Plasma);
        first.maintenance_infusions = false;
        let mut second = Target::new(600.0, 5.0, 10.0, TargetEffect::Plasma);
        second.maintenance_infusions = false;
        pump.add_target(first).unwrap();
        pump.add_target(second).unwrap();
        pump.generate_infusions().unwrap();

        let cp = pump
            .coefficients()
            .plasma_at(pump.infusion_list(), 610.0);
        assert_relative_eq!(cp, 5.0, epsilon = 0.01);
    }

    #[test]
    fn rate_view_matches_schedule() {
        let mut pump = pump();
        let mut target = Target::new(0.0, 4.0, 10.0, TargetEffect::Plasma);
        target.maintenance_infusions = false;
        pump.add_target(target).unwrap();
        pump.generate_infusions().unwrap();

        let rates = pump.infusion_rates();
        assert_eq!(rates.len(), pump.infusion_list().len());
        let expected = pump.infusion_list()[0].dose_per_sec * 3600.0 / 10.0;
        assert_relative_eq!(rates[0].ml_per_hr, expected, epsilon = 1e-9);

        let steps = pump.dose_per_weight(70.0).unwrap();
        assert_relative_eq!(
            steps[0].dose_per_kg,
            pump.infusion_list()[0].dose_per_sec * 10.0 / 70.0,
            epsilon = 1e-9
        );
        assert!(pump.dose_per_weight(0.0).is_err());
    }
}
