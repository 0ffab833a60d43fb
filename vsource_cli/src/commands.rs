//! Command implementations.

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use serde_json::json;
use vsource_config::{
    Catalog, EmulationInput, fit_measurements, load_calibration_toml, load_measurements_csv,
    write_calibration_toml,
};
use vsource_core::{
    CalibrationData, ConverterParameters, HarvesterParameters, RunSummary, SourceModel,
    TraceSample, replay, replay_parallel,
};

use crate::cli::{Cli, Commands};

pub fn run(cli: &Cli) -> Result<()> {
    match &cli.cmd {
        Commands::Resolve {
            source,
            samplerate,
            window_samples,
        } => resolve(cli, source, *samplerate, *window_samples),
        Commands::Simulate {
            source,
            input,
            output,
            window_samples,
        } => simulate(cli, source, input, output, *window_samples),
        Commands::Sweep {
            sources,
            input,
            window_samples,
        } => sweep(cli, sources, input, *window_samples),
        Commands::FitCalibration {
            measurements,
            output,
        } => fit_calibration(cli, measurements, output),
        Commands::Calibration { kernel } => calibration(cli, *kernel),
    }
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    match &cli.catalog {
        Some(path) => Catalog::load_file(path),
        None => Catalog::builtin(),
    }
}

fn load_calibration(cli: &Cli) -> Result<Arc<CalibrationData>> {
    let cal = match &cli.calibration {
        Some(path) => {
            let file = load_calibration_toml(path)?;
            CalibrationData::try_from(&file)
                .wrap_err_with(|| format!("calibration {}", path.display()))?
        }
        None => CalibrationData::default(),
    };
    Ok(Arc::new(cal))
}

const fn emulation_input(window_samples: u32) -> EmulationInput {
    if window_samples == 0 {
        EmulationInput::operating_points()
    } else {
        EmulationInput::ivcurve(window_samples)
    }
}

fn read_trace(path: &Path) -> Result<Vec<TraceSample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("open trace {}", path.display()))?;
    let mut samples = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceSample>().enumerate() {
        match rec {
            Ok(s) => samples.push(s),
            Err(e) => eyre::bail!("invalid trace row {}: {}", idx + 2, e),
        }
    }
    tracing::debug!(path = %path.display(), samples = samples.len(), "trace loaded");
    Ok(samples)
}

fn resolve(cli: &Cli, source: &str, samplerate: Option<f64>, window_samples: u32) -> Result<()> {
    let catalog = load_catalog(cli)?;
    let cal = load_calibration(cli)?;
    let src = catalog.source(source)?;
    let hrv = catalog.harvester(&src.harvester)?;
    let sps = samplerate.unwrap_or(src.samplerate_sps);

    let converter = ConverterParameters::from_config(&src, sps)?;
    let harvester =
        HarvesterParameters::for_emulation(&hrv, &cal, sps, &emulation_input(window_samples))?;
    let out = json!({
        "source": src,
        "harvester": hrv,
        "samplerate_sps": sps,
        "converter_parameters": converter,
        "harvester_parameters": harvester,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn simulate(
    cli: &Cli,
    source: &str,
    input: &Path,
    output: &Path,
    window_samples: u32,
) -> Result<()> {
    let catalog = load_catalog(cli)?;
    let cal = load_calibration(cli)?;
    let mut model =
        SourceModel::from_catalog(&catalog, source, cal, &emulation_input(window_samples))?;
    let trace = read_trace(input)?;

    let mut wtr = csv::Writer::from_path(output)
        .wrap_err_with(|| format!("create output {}", output.display()))?;
    let summary = replay(&mut model, source, trace, |record| {
        wtr.serialize(record).wrap_err("write step record")
    })?;
    wtr.flush()
        .wrap_err_with(|| format!("flush output {}", output.display()))?;

    print_summaries(cli, std::slice::from_ref(&summary))
}

fn sweep(cli: &Cli, sources: &[String], input: &Path, window_samples: u32) -> Result<()> {
    let catalog = load_catalog(cli)?;
    let cal = load_calibration(cli)?;
    let emulation = emulation_input(window_samples);
    let models = sources
        .iter()
        .map(|name| {
            SourceModel::from_catalog(&catalog, name, Arc::clone(&cal), &emulation)
                .map(|m| (name.clone(), m))
        })
        .collect::<Result<Vec<_>>>()?;
    let trace = read_trace(input)?;
    let summaries = replay_parallel(models, &trace)?;
    print_summaries(cli, &summaries)
}

fn print_summaries(cli: &Cli, summaries: &[RunSummary]) -> Result<()> {
    for s in summaries {
        if cli.json {
            println!("{}", serde_json::to_string(s)?);
        } else {
            println!(
                "{}: {} samples, V_out {:.3} V, V_mid {:.3} V (min {:.3}, max {:.3}), power good {:.1} %, harvested {:.6e} J, delivered {:.6e} J",
                s.source,
                s.samples,
                f64::from(s.v_out_final_uv) * 1e-6,
                f64::from(s.v_mid_final_uv) * 1e-6,
                f64::from(s.v_mid_min_uv) * 1e-6,
                f64::from(s.v_mid_max_uv) * 1e-6,
                percent(s.power_good_samples, s.samples),
                s.harvested_energy_j,
                s.delivered_energy_j,
            );
        }
    }
    Ok(())
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

fn fit_calibration(cli: &Cli, measurements: &Path, output: &Path) -> Result<()> {
    let rows = load_measurements_csv(measurements)?;
    let file = fit_measurements(&rows)?;
    // reject a fit the model could not use before touching the output
    CalibrationData::try_from(&file)?;
    write_calibration_toml(output, &file)?;
    tracing::info!(output = %output.display(), rows = rows.len(), "calibration written");
    if cli.json {
        println!("{}", json!({ "output": output.display().to_string(), "rows": rows.len() }));
    } else {
        println!("wrote {} ({} measurements)", output.display(), rows.len());
    }
    Ok(())
}

fn calibration(cli: &Cli, kernel: bool) -> Result<()> {
    let cal = load_calibration(cli)?;
    if kernel {
        let block = cal.export_for_kernel()?;
        println!("{}", serde_json::to_string_pretty(&block)?);
    } else if cli.json {
        println!("{}", serde_json::to_string_pretty(&cal.to_file())?);
    } else {
        print!("{}", cal.to_file().to_toml_string()?);
    }
    Ok(())
}
