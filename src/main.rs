use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;

mod config;
mod dosing;
mod error;
mod models;
mod output;
mod simulation;

use crate::config::ScenarioConfig;
use crate::models::{ModelCoefficients, SECONDS_PER_MINUTE};
use crate::simulation::{keo, Pump};

#[derive(Parser)]
#[command(name = "tci_simulation")]
#[command(about = "Target-controlled infusion simulator")]
struct Cli {
    /// Scenario file (JSON: model, pump, targets, infusions)
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Patient weight in kg; adds a weight-normalised dosing table
    #[arg(short, long)]
    weight: Option<f64>,

    /// Query time for a decrement report, in seconds
    #[arg(long)]
    decrement_time: Option<f64>,

    /// Decrement concentration for the report, in the model's unit
    #[arg(long)]
    decrement_target: Option<f64>,

    /// Only print the generated schedule, skip the trajectory files
    #[arg(long)]
    schedule_only: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let scenario = ScenarioConfig::from_file(&cli.config)
        .with_context(|| format!("loading scenario from {:?}", cli.config))?;
    info!("Loaded scenario from {:?}", cli.config);

    let mut model = scenario.model;
    if model.ke0 <= 0.0 {
        if let Some(calibration) = &scenario.tpeak_calibration {
            let coeffs = ModelCoefficients::derive(&model).context("deriving coefficients")?;
            let ke0 = keo::ke0_from_tpeak(
                &coeffs,
                calibration.dose,
                calibration.t_peak,
                calibration.ce_tpeak,
            )
            .context("estimating ke0 from t_peak")?;
            model.ke0 = ke0 * SECONDS_PER_MINUTE;
            info!("Calibrated ke0 = {:.6}/min from t_peak", model.ke0);
        }
    }

    let mut pump = Pump::new(model, scenario.pump).context("building the pump")?;
    for infusion in &scenario.infusions {
        pump.add_infusion(infusion.start, infusion.dose_per_sec, infusion.duration)?;
    }
    for target in scenario.targets {
        pump.add_target(target)?;
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {:?}", cli.output))?;

    if cli.schedule_only {
        pump.generate_infusions().context("generating the schedule")?;
        info!("Generated {} infusions", pump.infusion_list().len());
        for infusion in pump.infusion_list() {
            println!(
                "{:10.1} s  {:12.6}/s  {:8.1} s  -> {:10.1} s",
                infusion.start, infusion.dose_per_sec, infusion.duration, infusion.end
            );
        }
        return Ok(());
    }

    let trajectory = pump.run().context("running the simulation")?;
    info!(
        "Simulated {} samples over {} infusions",
        trajectory.len(),
        pump.infusion_list().len()
    );

    output::save_results(&pump, &trajectory, &cli.output).context("saving results")?;
    if let Some(weight) = cli.weight {
        output::save_dose_per_weight(&pump, weight, &cli.output)
            .context("saving weight-normalised doses")?;
    }
    output::generate_report(&pump, &trajectory, &cli.output).context("writing the report")?;

    if let (Some(time), Some(target)) = (cli.decrement_time, cli.decrement_target) {
        let plasma = pump.plasma_decrement_time(time, target);
        let effect = pump.effect_decrement_time(time, target);
        info!(
            "Decrement to {:.2} from {:.0} s: plasma {:.0} s, effect {:.0} s",
            target, time, plasma, effect
        );
        println!("plasma decrement: {:.0} s", plasma);
        println!("effect decrement: {:.0} s", effect);
    }

    info!("Results saved to {:?}", cli.output);
    Ok(())
}
