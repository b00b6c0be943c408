use log::debug;

use crate::config::PumpConfig;
use crate::dosing::roots::secant;
use crate::dosing::{Target, DEFAULT_CP_LIMIT};
use crate::error::TciWarning;
use crate::models::{Infusion, ModelCoefficients};

const MAX_SOLVER_ITERATIONS: usize = 50;
const DURATION_EXTENSION_ROUNDS: usize = 25;
/// Step tolerance for the overshoot-factor search.
const LIMIT_TOLERANCE: f64 = 1e-4;
/// Residual tolerance in concentration units.
const CONCENTRATION_TOLERANCE: f64 = 1e-3;
/// Step tolerance for the plateau-duration search, in seconds.
const PLATEAU_TOLERANCE: f64 = 1.0;
/// Lookahead past the last infusion when hunting the effect-site peak.
const PEAK_HORIZON: f64 = 7200.0;
/// The initial-infusion rate-cap loop gives up at this multiple of the
/// requested duration.
const DURATION_CEILING_FACTOR: f64 = 10.0;

/// Result of an original-method effect-site solve.
#[derive(Debug, Clone)]
pub struct EffectSolution {
    /// Solved plasma overshoot factor.
    pub limit: f64,
    /// Bolus that raises plasma to target * limit.
    pub bolus: Infusion,
    /// Absolute time at which the effect-site curve peaks on the target.
    pub time_to_target: f64,
}

/// Inverse-problem solver: doses that reach plasma targets, maintenance
/// schedules, and the two effect-site targeting methods. Warnings accumulate
/// on the solver and are drained by the scheduler after a run.
pub struct DosingSolver<'a> {
    coeffs: &'a ModelCoefficients,
    config: &'a PumpConfig,
    warnings: Vec<TciWarning>,
}

impl<'a> DosingSolver<'a> {
    pub fn new(coeffs: &'a ModelCoefficients, config: &'a PumpConfig) -> Self {
        Self {
            coeffs,
            config,
            warnings: Vec::new(),
        }
    }

    pub fn into_warnings(self) -> Vec<TciWarning> {
        self.warnings
    }

    /// Infusion that raises plasma concentration to `target` at the end of
    /// `duration` seconds, given everything already scheduled. Over-rate
    /// infusions longer than the bolus threshold are stretched 1 s at a time
    /// until the pump can deliver them.
    pub fn plasma_infusion(
        &mut self,
        infusions: &[Infusion],
        target: f64,
        start: f64,
        duration: f64,
    ) -> Infusion {
        let (infusion, cap) = self.plasma_infusion_inner(infusions, target, start, duration);
        self.record_cap(cap);
        infusion
    }

    fn plasma_infusion_inner(
        &self,
        infusions: &[Infusion],
        target: f64,
        start: f64,
        duration: f64,
    ) -> (Infusion, CapOutcome) {
        let requested = duration.max(1.0);
        let projected = self.coeffs.plasma_at(infusions, start + requested);
        let delta = target - projected;
        if delta <= 0.0 {
            return (Infusion::new(start, 0.0, requested), CapOutcome::Untouched);
        }

        let ceiling = requested * DURATION_CEILING_FACTOR;
        let mut span = requested;
        loop {
            let dose = delta / self.coeffs.response_integral(0.0, span);
            let rate = self.config.ml_per_hr(dose);

            let exempt = !self.config.rate_cap_enabled() || self.config.is_bolus(span);
            if exempt || rate <= self.config.max_infusion_rate {
                let cap = if span > requested {
                    CapOutcome::Extended {
                        start,
                        requested_rate: self.config.ml_per_hr(delta / self.coeffs.response_integral(0.0, requested)),
                    }
                } else {
                    CapOutcome::Untouched
                };
                return (Infusion::new(start, dose, span), cap);
            }

            if span >= ceiling {
                // Give up stretching: clamp the dose and say so.
                let clamped = self.config.dose_for_rate(self.config.max_infusion_rate);
                return (
                    Infusion::new(start, clamped, span),
                    CapOutcome::CeilingHit { start, requested_rate: rate },
                );
            }
            span += 1.0;
        }
    }

    /// Dose that holds `target` over [start, start + duration] against decay,
    /// clamped to the pump's maximum rate.
    pub fn maintenance_dose(
        &mut self,
        infusions: &[Infusion],
        target: f64,
        start: f64,
        duration: f64,
    ) -> f64 {
        let (dose, cap) = self.maintenance_dose_inner(infusions, target, start, duration);
        self.record_cap(cap);
        dose
    }

    fn maintenance_dose_inner(
        &self,
        infusions: &[Infusion],
        target: f64,
        start: f64,
        duration: f64,
    ) -> (f64, CapOutcome) {
        if duration <= 0.0 {
            return (0.0, CapOutcome::Untouched);
        }
        let delta = target - self.coeffs.plasma_at(infusions, start + duration);
        if delta <= 0.0 {
            return (0.0, CapOutcome::Untouched);
        }

        let dose = delta / self.coeffs.response_integral(0.0, duration);
        let rate = self.config.ml_per_hr(dose);
        if self.config.rate_cap_enabled()
            && !self.config.is_bolus(duration)
            && rate > self.config.max_infusion_rate
        {
            let clamped = self.config.dose_for_rate(self.config.max_infusion_rate);
            return (clamped, CapOutcome::CeilingHit { start, requested_rate: rate });
        }
        (dose, CapOutcome::Untouched)
    }

    /// Maintenance rounds from `from` to `until` under the exponentially
    /// growing cadence; the last round is truncated to end at `until`.
    pub fn maintenance_schedule(
        &mut self,
        infusions: &mut Vec<Infusion>,
        target: f64,
        from: f64,
        until: f64,
    ) {
        let mut start = from;
        let mut round_duration = self.config.maintenance_infusion_duration;

        while until - start > 0.0 {
            let span = round_duration.min(until - start);
            let dose = self.maintenance_dose(infusions, target, start, span);
            infusions.push(Infusion::new(start, dose, span));
            start += span;
            round_duration *= self.config.maintenance_infusion_multiplier;
        }
    }

    /// Original-method effect-site targeting: the smallest plasma overshoot
    /// whose bolus makes the effect-site curve graze the target. Honors a
    /// requested time-to-target longer than the minimum by stretching the
    /// bolus window.
    pub fn effect_bolus_solution(&mut self, infusions: &[Infusion], target: &Target) -> EffectSolution {
        let seed = target.cp_limit.unwrap_or(DEFAULT_CP_LIMIT);
        let mut window = target.cp_limit_duration;

        let mut rounds = 0;
        loop {
            let solution = self.solve_limit(infusions, target, seed, window);
            let achieved = solution.time_to_target - target.start;

            if target.duration > achieved + PLATEAU_TOLERANCE {
                if rounds < DURATION_EXTENSION_ROUNDS {
                    window += target.duration - achieved;
                    rounds += 1;
                    continue;
                }
                self.warnings.push(TciWarning::NonConvergence {
                    context: "time-to-target extension",
                    iterations: rounds,
                });
            }
            return solution;
        }
    }

    fn solve_limit(
        &mut self,
        infusions: &[Infusion],
        target: &Target,
        seed: f64,
        window: f64,
    ) -> EffectSolution {
        let residual = |limit: f64| {
            let (bolus, _) =
                self.plasma_infusion_inner(infusions, target.target * limit, target.start, window);
            let mut candidate = infusions.to_vec();
            let after = bolus.end;
            candidate.push(bolus);
            let (_, peak) = self.effect_peak(&candidate, after);
            target.target - peak
        };

        let search = secant(
            residual,
            seed,
            seed * 1.1,
            LIMIT_TOLERANCE,
            CONCENTRATION_TOLERANCE,
            MAX_SOLVER_ITERATIONS,
            Some(LIMIT_TOLERANCE),
        );
        let limit = if search.converged {
            search.root
        } else {
            self.warnings.push(TciWarning::NonConvergence {
                context: "effect-site limit search",
                iterations: search.iterations,
            });
            seed
        };
        debug!(
            "overshoot search: limit {:.4} after {} iterations",
            limit, search.iterations
        );

        let bolus = self.plasma_infusion(infusions, target.target * limit, target.start, window);
        let mut scheduled = infusions.to_vec();
        scheduled.push(bolus.clone());
        let (peak_time, _) = self.effect_peak(&scheduled, bolus.end);

        EffectSolution {
            limit,
            bolus,
            time_to_target: peak_time,
        }
    }

    /// Revised-method effect-site targeting: with the overshoot fixed, the
    /// plateau duration after which free plasma decay lets the rising
    /// effect-site curve meet the target exactly. Returns the plateau and the
    /// trailing zero-dose coast.
    pub fn effect_plateau(
        &mut self,
        infusions: &[Infusion],
        target: &Target,
        limit: f64,
        bolus: &Infusion,
    ) -> (Infusion, Infusion) {
        let plateau_level = target.target * limit;
        let plateau_start = bolus.end;

        let mut base = infusions.to_vec();
        base.push(bolus.clone());

        let residual = |plateau: f64| {
            let span = plateau.max(0.0);
            let (dose, _) = self.maintenance_dose_inner(&base, plateau_level, plateau_start, span);
            let mut candidate = base.clone();
            candidate.push(Infusion::new(plateau_start, dose, span));
            let (_, peak) = self.effect_peak(&candidate, plateau_start + span);
            target.target - peak
        };

        let search = secant(
            residual,
            1.0,
            2.0 * target.cp_limit_duration,
            PLATEAU_TOLERANCE,
            CONCENTRATION_TOLERANCE,
            MAX_SOLVER_ITERATIONS,
            Some(0.0),
        );
        let span = if search.converged {
            search.root.max(0.0)
        } else {
            self.warnings.push(TciWarning::NonConvergence {
                context: "plateau duration search",
                iterations: search.iterations,
            });
            0.0
        };
        debug!("plateau search: {:.1} s after {} iterations", span, search.iterations);

        let dose = self.maintenance_dose(&base, plateau_level, plateau_start, span);
        let plateau = Infusion::new(plateau_start, dose, span);
        base.push(plateau.clone());

        // Coast on zero dose until plasma first drops below the target.
        let mut cursor = plateau.end;
        while self.coeffs.plasma_at(&base, cursor) >= target.target {
            cursor += 1.0;
        }
        let coast = Infusion::new(plateau.end, 0.0, cursor - plateau.end);

        (plateau, coast)
    }

    /// First local maximum of the effect-site curve after `after`, as
    /// (time, concentration). Falls back to the last simulated sample when
    /// the curve is still rising at the horizon.
    fn effect_peak(&self, infusions: &[Infusion], after: f64) -> (f64, f64) {
        let samples = (after + PEAK_HORIZON).ceil() as usize;
        let plasma = self.coeffs.plasma_series(infusions, samples);
        let effect = self.coeffs.effect_series(&plasma);

        let from = after.floor() as usize + 1;
        for j in from..effect.len() {
            if effect[j] - effect[j - 1] <= 0.0 {
                return ((j - 1) as f64, effect[j - 1]);
            }
        }
        (
            (effect.len().saturating_sub(1)) as f64,
            effect.last().copied().unwrap_or(0.0),
        )
    }

    fn record_cap(&mut self, cap: CapOutcome) {
        match cap {
            CapOutcome::Untouched => {}
            CapOutcome::Extended { start, requested_rate }
            | CapOutcome::CeilingHit { start, requested_rate } => {
                self.warnings.push(TciWarning::RateCapHit {
                    start,
                    requested_ml_per_hr: requested_rate,
                    max_ml_per_hr: self.config.max_infusion_rate,
                });
                if matches!(cap, CapOutcome::CeilingHit { .. }) {
                    self.warnings.push(TciWarning::NonConvergence {
                        context: "rate-cap duration extension",
                        iterations: MAX_SOLVER_ITERATIONS,
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CapOutcome {
    Untouched,
    /// The infusion was stretched past its requested duration to satisfy the
    /// rate cap.
    Extended { start: f64, requested_rate: f64 },
    /// Stretching hit the ceiling; the dose was clamped to the cap.
    CeilingHit { start: f64, requested_rate: f64 },
}
