//! Trace replay, single model or several in parallel.

use crossbeam_channel as xch;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::SourceModel;

/// One input sample of a recorded trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TraceSample {
    #[serde(rename = "voltage_uV")]
    pub voltage_uv: u32,
    #[serde(rename = "current_nA")]
    pub current_na: u32,
    #[serde(rename = "current_out_nA")]
    pub current_out_na: u32,
}

/// Per-sample output of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    #[serde(rename = "v_out_uV")]
    pub v_out_uv: u32,
    #[serde(rename = "v_mid_uV")]
    pub v_mid_uv: u32,
    #[serde(rename = "p_in_fW")]
    pub p_in_fw: u64,
    #[serde(rename = "p_out_fW")]
    pub p_out_fw: u64,
    pub power_good: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub samples: u64,
    pub v_out_final_uv: u32,
    pub v_mid_final_uv: u32,
    pub v_mid_min_uv: u32,
    pub v_mid_max_uv: u32,
    pub power_good_samples: u64,
    pub outputting_samples: u64,
    pub harvested_energy_j: f64,
    pub delivered_energy_j: f64,
}

impl RunSummary {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_owned(),
            samples: 0,
            v_out_final_uv: 0,
            v_mid_final_uv: 0,
            v_mid_min_uv: u32::MAX,
            v_mid_max_uv: 0,
            power_good_samples: 0,
            outputting_samples: 0,
            harvested_energy_j: 0.0,
            delivered_energy_j: 0.0,
        }
    }
}

/// Feed `samples` through `model`, handing every step to `on_record`.
///
/// Energies in the summary come from the model's accumulator, which is
/// enabled here if the caller did not.
pub fn replay<I, F>(
    model: &mut SourceModel,
    source: &str,
    samples: I,
    mut on_record: F,
) -> Result<RunSummary>
where
    I: IntoIterator<Item = TraceSample>,
    F: FnMut(&StepRecord) -> Result<()>,
{
    model.enable_accumulator();
    let mut summary = RunSummary::new(source);

    for sample in samples {
        let v_out_uv = model.step(sample.voltage_uv, sample.current_na, sample.current_out_na);
        let cnv = model.converter();
        let record = StepRecord {
            v_out_uv,
            v_mid_uv: cnv.v_intermediate_uv(),
            p_in_fw: cnv.p_input_fw(),
            p_out_fw: cnv.p_output_fw(),
            power_good: cnv.power_good(),
        };
        summary.samples += 1;
        summary.v_mid_min_uv = summary.v_mid_min_uv.min(record.v_mid_uv);
        summary.v_mid_max_uv = summary.v_mid_max_uv.max(record.v_mid_uv);
        summary.power_good_samples += u64::from(record.power_good);
        summary.outputting_samples += u64::from(cnv.is_outputting());
        summary.v_out_final_uv = v_out_uv;
        summary.v_mid_final_uv = record.v_mid_uv;
        on_record(&record)?;
    }

    if summary.samples == 0 {
        summary.v_mid_min_uv = model.converter().v_intermediate_uv();
        summary.v_mid_max_uv = summary.v_mid_min_uv;
        summary.v_mid_final_uv = summary.v_mid_min_uv;
    }
    if let Some(acc) = model.accumulator() {
        summary.harvested_energy_j = acc.harvested_energy_j(model.samplerate_sps());
        summary.delivered_energy_j = acc.delivered_energy_j(model.samplerate_sps());
    }
    tracing::info!(
        source,
        samples = summary.samples,
        v_mid_final_uv = summary.v_mid_final_uv,
        harvested_j = summary.harvested_energy_j,
        delivered_j = summary.delivered_energy_j,
        "replay complete"
    );
    Ok(summary)
}

/// Replay one trace through several independent models, one thread each.
///
/// Summaries come back in the order of `models`.
pub fn replay_parallel(
    models: Vec<(String, SourceModel)>,
    trace: &[TraceSample],
) -> Result<Vec<RunSummary>> {
    let count = models.len();
    let (tx, rx) = xch::bounded::<(usize, Result<RunSummary>)>(count.max(1));

    std::thread::scope(|scope| {
        for (idx, (name, mut model)) in models.into_iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move || {
                let summary = replay(&mut model, &name, trace.iter().copied(), |_| Ok(()));
                if tx.send((idx, summary)).is_err() {
                    tracing::debug!(source = %name, "replay consumer gone");
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<RunSummary>> = vec![None; count];
    for (idx, summary) in rx.iter() {
        slots[idx] = Some(summary?);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.ok_or_else(|| eyre::eyre!("replay worker {idx} sent no result")))
        .collect()
}
