//! Virtual source preset schema.
//!
//! Values stay in the units presets are written in (mV, mA, nA, µF, ms). The
//! conversion into kernel units happens in the core crate.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::preset::Resolved;
use crate::range::{U32_LIMIT, check_num};

/// Side length of the efficiency lookup tables.
pub const LUT_SIZE: usize = 12;

const V_LIMIT_MV: f64 = 10_000.0;
const V_OUTPUT_LIMIT_MV: f64 = 5_000.0;
const LOG2_LIMIT: f64 = 20.0;

#[derive(Debug, Deserialize)]
struct SourceDef {
    harvester: String,
    samplerate_sps: f64,
    enable_storage: bool,
    enable_boost: bool,
    enable_buck: bool,
    log_intermediate_voltage: bool,
    interval_startup_delay_drain_ms: f64,
    v_input_max_mv: f64,
    i_input_max_ma: f64,
    v_input_drop_mv: f64,
    r_input_mohm: f64,
    c_intermediate_uf: f64,
    v_intermediate_init_mv: f64,
    i_intermediate_leak_na: f64,
    v_enable_output_threshold_mv: f64,
    v_disable_output_threshold_mv: f64,
    c_output_uf: f64,
    interval_check_thresholds_ms: f64,
    v_pwr_good_enable_threshold_mv: f64,
    v_pwr_good_disable_threshold_mv: f64,
    immediate_pwr_good_signal: bool,
    v_output_log_gpio_threshold_mv: f64,
    v_intermediate_max_mv: f64,
    v_output_mv: f64,
    #[serde(default)]
    v_input_boost_threshold_mv: Option<f64>,
    #[serde(default)]
    lut_input_v_min_log2_uv: Option<f64>,
    #[serde(default)]
    lut_input_i_min_log2_na: Option<f64>,
    #[serde(default)]
    lut_input_efficiency: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    v_buck_drop_mv: Option<f64>,
    #[serde(default)]
    lut_output_i_min_log2_na: Option<f64>,
    #[serde(default)]
    lut_output_efficiency: Option<Vec<f64>>,
}

/// Boost (input) stage: only present when `enable_boost` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoostStage {
    pub v_input_boost_threshold_mv: f64,
    pub lut_input_v_min_log2_uv: u32,
    pub lut_input_i_min_log2_na: u32,
    /// Efficiency by `[voltage bucket][current bucket]`, each in `0..=1`.
    pub lut_input_efficiency: [[f64; LUT_SIZE]; LUT_SIZE],
}

/// Buck (output) stage: only present when `enable_buck` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuckStage {
    pub lut_output_i_min_log2_na: u32,
    /// Efficiency by output current bucket, each in `0..=1`.
    pub lut_output_efficiency: [f64; LUT_SIZE],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualSourceConfig {
    pub name: String,
    pub chain: Vec<String>,
    /// Harvester preset feeding this source.
    pub harvester: String,
    pub samplerate_sps: f64,
    pub enable_storage: bool,
    pub log_intermediate_voltage: bool,
    pub interval_startup_delay_drain_ms: f64,
    pub v_input_max_mv: f64,
    pub i_input_max_ma: f64,
    pub v_input_drop_mv: f64,
    pub r_input_mohm: f64,
    pub c_intermediate_uf: f64,
    pub v_intermediate_init_mv: f64,
    pub i_intermediate_leak_na: f64,
    pub v_enable_output_threshold_mv: f64,
    pub v_disable_output_threshold_mv: f64,
    pub c_output_uf: f64,
    pub interval_check_thresholds_ms: f64,
    pub v_pwr_good_enable_threshold_mv: f64,
    pub v_pwr_good_disable_threshold_mv: f64,
    pub immediate_pwr_good_signal: bool,
    pub v_output_log_gpio_threshold_mv: f64,
    pub v_intermediate_max_mv: f64,
    pub v_output_mv: f64,
    /// Drop across the buck stage; 0 when the buck is disabled.
    pub v_buck_drop_mv: f64,
    pub boost: Option<BoostStage>,
    pub buck: Option<BuckStage>,
}

impl VirtualSourceConfig {
    pub fn from_resolved(resolved: &Resolved) -> eyre::Result<Self> {
        let def: SourceDef = toml::Value::Table(resolved.values.clone())
            .try_into()
            .map_err(|e: toml::de::Error| {
                eyre::Report::new(ConfigError::Invalid {
                    kind: "source",
                    name: resolved.name.clone(),
                    reason: e.message().to_owned(),
                })
            })?;
        let p = resolved.name.as_str();

        if def.enable_boost && !def.enable_storage {
            return Err(eyre::Report::new(ConfigError::ModeConflict(
                "boost converter requires enable_storage",
            )));
        }
        let c_intermediate_uf =
            check_num(p, "c_intermediate_uf", def.c_intermediate_uf, 0.0, 100_000.0)?;
        if def.enable_storage && c_intermediate_uf <= 0.0 {
            return Err(eyre::Report::new(ConfigError::Invalid {
                kind: "source",
                name: resolved.name.clone(),
                reason: "enable_storage needs c_intermediate_uf > 0".to_owned(),
            }));
        }

        let boost = if def.enable_boost {
            Some(parse_boost(p, &def)?)
        } else {
            None
        };
        let buck = if def.enable_buck {
            Some(parse_buck(p, &def)?)
        } else {
            None
        };
        let v_buck_drop_mv = if def.enable_buck {
            check_num(
                p,
                "v_buck_drop_mv",
                def.v_buck_drop_mv.unwrap_or(0.0),
                0.0,
                V_OUTPUT_LIMIT_MV,
            )?
        } else {
            0.0
        };

        let v_intermediate_max_mv = check_num(
            p,
            "v_intermediate_max_mv",
            def.v_intermediate_max_mv,
            0.0,
            V_LIMIT_MV,
        )?;
        let v_disable_output_threshold_mv = check_num(
            p,
            "v_disable_output_threshold_mv",
            def.v_disable_output_threshold_mv,
            0.0,
            V_LIMIT_MV,
        )?;
        let v_pwr_good_disable_threshold_mv = check_num(
            p,
            "v_pwr_good_disable_threshold_mv",
            def.v_pwr_good_disable_threshold_mv,
            0.0,
            V_LIMIT_MV,
        )?;

        let cfg = Self {
            name: resolved.name.clone(),
            chain: resolved.chain.clone(),
            harvester: def.harvester,
            samplerate_sps: check_num(p, "samplerate_sps", def.samplerate_sps, 1.0, 1_000_000.0)?,
            enable_storage: def.enable_storage,
            log_intermediate_voltage: def.log_intermediate_voltage,
            interval_startup_delay_drain_ms: check_num(
                p,
                "interval_startup_delay_drain_ms",
                def.interval_startup_delay_drain_ms,
                0.0,
                10_000.0,
            )?,
            v_input_max_mv: check_num(p, "v_input_max_mv", def.v_input_max_mv, 0.0, V_LIMIT_MV)?,
            i_input_max_ma: check_num(p, "i_input_max_ma", def.i_input_max_ma, 0.0, 4_200.0)?,
            v_input_drop_mv: check_num(
                p,
                "v_input_drop_mv",
                def.v_input_drop_mv,
                0.0,
                V_LIMIT_MV,
            )?,
            r_input_mohm: check_num(p, "r_input_mohm", def.r_input_mohm, 0.0, U32_LIMIT)?,
            c_intermediate_uf,
            v_intermediate_init_mv: check_num(
                p,
                "v_intermediate_init_mv",
                def.v_intermediate_init_mv,
                0.0,
                v_intermediate_max_mv,
            )?,
            i_intermediate_leak_na: check_num(
                p,
                "i_intermediate_leak_na",
                def.i_intermediate_leak_na,
                0.0,
                U32_LIMIT,
            )?,
            v_enable_output_threshold_mv: check_num(
                p,
                "v_enable_output_threshold_mv",
                def.v_enable_output_threshold_mv,
                v_disable_output_threshold_mv,
                V_LIMIT_MV,
            )?,
            v_disable_output_threshold_mv,
            c_output_uf: check_num(p, "c_output_uf", def.c_output_uf, 0.0, 4_294_967.0)?,
            interval_check_thresholds_ms: check_num(
                p,
                "interval_check_thresholds_ms",
                def.interval_check_thresholds_ms,
                0.0,
                4_294_967.0,
            )?,
            v_pwr_good_enable_threshold_mv: check_num(
                p,
                "v_pwr_good_enable_threshold_mv",
                def.v_pwr_good_enable_threshold_mv,
                v_pwr_good_disable_threshold_mv,
                V_LIMIT_MV,
            )?,
            v_pwr_good_disable_threshold_mv,
            immediate_pwr_good_signal: def.immediate_pwr_good_signal,
            v_output_log_gpio_threshold_mv: check_num(
                p,
                "v_output_log_gpio_threshold_mv",
                def.v_output_log_gpio_threshold_mv,
                0.0,
                V_LIMIT_MV,
            )?,
            v_intermediate_max_mv,
            v_output_mv: check_num(p, "v_output_mv", def.v_output_mv, 0.0, V_OUTPUT_LIMIT_MV)?,
            v_buck_drop_mv,
            boost,
            buck,
        };
        tracing::debug!(
            source = %cfg.name,
            harvester = %cfg.harvester,
            storage = cfg.enable_storage,
            boost = cfg.boost.is_some(),
            buck = cfg.buck.is_some(),
            "source config validated"
        );
        Ok(cfg)
    }

    pub const fn enable_boost(&self) -> bool {
        self.boost.is_some()
    }

    pub const fn enable_buck(&self) -> bool {
        self.buck.is_some()
    }
}

fn parse_boost(p: &str, def: &SourceDef) -> eyre::Result<BoostStage> {
    let missing = |field: &'static str| {
        eyre::Report::new(ConfigError::MissingField {
            field,
            required_by: "enable_boost",
        })
    };
    let threshold = def
        .v_input_boost_threshold_mv
        .ok_or_else(|| missing("v_input_boost_threshold_mv"))?;
    let v_log2 = def
        .lut_input_v_min_log2_uv
        .ok_or_else(|| missing("lut_input_v_min_log2_uv"))?;
    let i_log2 = def
        .lut_input_i_min_log2_na
        .ok_or_else(|| missing("lut_input_i_min_log2_na"))?;
    let rows = def
        .lut_input_efficiency
        .as_ref()
        .ok_or_else(|| missing("lut_input_efficiency"))?;

    if rows.len() != LUT_SIZE || rows.iter().any(|row| row.len() != LUT_SIZE) {
        let widths: Vec<String> = rows.iter().map(|r| r.len().to_string()).collect();
        return Err(eyre::Report::new(ConfigError::LutShape {
            lut: "lut_input_efficiency",
            expected: "12x12",
            actual: format!("{} rows of [{}]", rows.len(), widths.join(", ")),
        }));
    }
    let mut lut = [[0.0; LUT_SIZE]; LUT_SIZE];
    for (dst_row, src_row) in lut.iter_mut().zip(rows) {
        for (dst, &eta) in dst_row.iter_mut().zip(src_row) {
            *dst = check_num(p, "lut_input_efficiency", eta, 0.0, 1.0)?;
        }
    }

    Ok(BoostStage {
        v_input_boost_threshold_mv: check_num(
            p,
            "v_input_boost_threshold_mv",
            threshold,
            0.0,
            V_LIMIT_MV,
        )?,
        lut_input_v_min_log2_uv: check_num(p, "lut_input_v_min_log2_uv", v_log2, 0.0, LOG2_LIMIT)?
            .round() as u32,
        lut_input_i_min_log2_na: check_num(p, "lut_input_i_min_log2_na", i_log2, 0.0, LOG2_LIMIT)?
            .round() as u32,
        lut_input_efficiency: lut,
    })
}

fn parse_buck(p: &str, def: &SourceDef) -> eyre::Result<BuckStage> {
    let missing = |field: &'static str| {
        eyre::Report::new(ConfigError::MissingField {
            field,
            required_by: "enable_buck",
        })
    };
    let i_log2 = def
        .lut_output_i_min_log2_na
        .ok_or_else(|| missing("lut_output_i_min_log2_na"))?;
    let values = def
        .lut_output_efficiency
        .as_ref()
        .ok_or_else(|| missing("lut_output_efficiency"))?;
    if values.len() != LUT_SIZE {
        return Err(eyre::Report::new(ConfigError::LutShape {
            lut: "lut_output_efficiency",
            expected: "12",
            actual: format!("{} entries", values.len()),
        }));
    }
    let mut lut = [0.0; LUT_SIZE];
    for (dst, &eta) in lut.iter_mut().zip(values) {
        *dst = check_num(p, "lut_output_efficiency", eta, 0.0, 1.0)?;
    }
    Ok(BuckStage {
        lut_output_i_min_log2_na: check_num(
            p,
            "lut_output_i_min_log2_na",
            i_log2,
            0.0,
            LOG2_LIMIT,
        )?
        .round() as u32,
        lut_output_efficiency: lut,
    })
}
