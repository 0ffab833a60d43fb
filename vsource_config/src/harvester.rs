//! Harvester preset schema and static range checks.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::preset::Resolved;
use crate::range::{U32_LIMIT, check_num};

/// Harvesting algorithms, ordered by capability.
///
/// The order matters: emulation needs an algorithm above `IvCurve`, harvesting
/// needs anything above `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum HarvesterAlgorithm {
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "isc_voc")]
    IscVoc,
    #[serde(rename = "ivcurve")]
    IvCurve,
    #[serde(rename = "cv")]
    Cv,
    #[serde(rename = "mppt_voc")]
    MpptVoc,
    #[serde(rename = "mppt_po")]
    MpptPo,
    #[serde(rename = "mppt_opt")]
    MpptOpt,
}

impl HarvesterAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::IscVoc => "isc_voc",
            Self::IvCurve => "ivcurve",
            Self::Cv => "cv",
            Self::MpptVoc => "mppt_voc",
            Self::MpptPo => "mppt_po",
            Self::MpptOpt => "mppt_opt",
        }
    }
}

impl std::fmt::Display for HarvesterAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of a recorded input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum IvDataKind {
    /// Repeating voltage sweeps, one IV curve per window.
    #[serde(rename = "ivcurve")]
    IvCurve,
    /// Already-harvested operating points.
    #[serde(rename = "ivsample")]
    IvSample,
    /// Alternating short-circuit current / open-circuit voltage samples.
    #[serde(rename = "isc_voc")]
    IscVoc,
}

/// Description of the input stream an emulation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmulationInput {
    pub dtype: IvDataKind,
    /// Samples per IV curve; 0 disables the harvesting stage.
    pub window_samples: u32,
}

impl EmulationInput {
    /// Input that already holds operating points; the harvester passes it through.
    pub const fn operating_points() -> Self {
        Self {
            dtype: IvDataKind::IvSample,
            window_samples: 0,
        }
    }

    pub const fn ivcurve(window_samples: u32) -> Self {
        Self {
            dtype: IvDataKind::IvCurve,
            window_samples,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HarvesterDef {
    algorithm: HarvesterAlgorithm,
    dtype: IvDataKind,
    window_size: f64,
    voltage_mv: f64,
    voltage_min_mv: f64,
    voltage_max_mv: f64,
    #[serde(default)]
    voltage_step_mv: Option<f64>,
    current_limit_ua: f64,
    setpoint_n: f64,
    rising: bool,
    wait_cycles: f64,
    interval_ms: f64,
    duration_ms: f64,
}

/// Validated harvester configuration in human units (mV, µA, ms).
///
/// Bounds that depend on calibration or the sample rate are applied later, when
/// the kernel parameter block is derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvesterConfig {
    pub name: String,
    pub chain: Vec<String>,
    pub algorithm: HarvesterAlgorithm,
    pub dtype: IvDataKind,
    pub window_size: u32,
    pub voltage_mv: f64,
    pub voltage_min_mv: f64,
    pub voltage_max_mv: f64,
    pub voltage_step_mv: f64,
    pub current_limit_ua: f64,
    pub setpoint_n: f64,
    pub rising: bool,
    pub wait_cycles: u32,
    pub interval_ms: f64,
    pub duration_ms: f64,
}

impl HarvesterConfig {
    pub fn from_resolved(resolved: &Resolved) -> eyre::Result<Self> {
        let def: HarvesterDef = toml::Value::Table(resolved.values.clone())
            .try_into()
            .map_err(|e: toml::de::Error| {
                eyre::Report::new(ConfigError::Invalid {
                    kind: "harvester",
                    name: resolved.name.clone(),
                    reason: e.message().to_owned(),
                })
            })?;
        let p = resolved.name.as_str();

        let window_size = check_num(p, "window_size", def.window_size, 16.0, 2_000.0)?.round();
        let voltage_min_mv = check_num(p, "voltage_min_mv", def.voltage_min_mv, 0.0, 5_000.0)?;
        let voltage_max_mv = check_num(
            p,
            "voltage_max_mv",
            def.voltage_max_mv,
            voltage_min_mv,
            5_000.0,
        )?;
        let voltage_mv = check_num(
            p,
            "voltage_mv",
            def.voltage_mv,
            voltage_min_mv,
            voltage_max_mv,
        )?;
        let current_limit_ua = check_num(p, "current_limit_ua", def.current_limit_ua, 0.0, 50_000.0)?;
        let voltage_step_mv = match def.voltage_step_mv {
            Some(step) => check_num(p, "voltage_step_mv", step, 0.0, 1_000_000.0)?,
            None => (voltage_max_mv - voltage_min_mv).abs() / window_size,
        };
        let setpoint_n = check_num(p, "setpoint_n", def.setpoint_n, 0.0, 1.0)?;
        let wait_cycles = check_num(p, "wait_cycles", def.wait_cycles, 0.0, 100.0)?.round();
        let interval_ms = check_num(p, "interval_ms", def.interval_ms, 0.01, 1_000_000.0)?;
        let duration_ms = check_num(p, "duration_ms", def.duration_ms, 0.01, interval_ms)?;

        Ok(Self {
            name: resolved.name.clone(),
            chain: resolved.chain.clone(),
            algorithm: def.algorithm,
            dtype: def.dtype,
            window_size: window_size.min(U32_LIMIT) as u32,
            voltage_mv,
            voltage_min_mv,
            voltage_max_mv,
            voltage_step_mv,
            current_limit_ua,
            setpoint_n,
            rising: def.rising,
            wait_cycles: wait_cycles as u32,
            interval_ms,
            duration_ms,
        })
    }

    /// Samples one full IV sweep of this harvester spans.
    pub const fn window_samples(&self) -> u32 {
        self.window_size.saturating_mul(1 + self.wait_cycles)
    }
}
