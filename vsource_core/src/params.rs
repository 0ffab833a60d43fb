//! Kernel parameter blocks derived once from validated configuration.
//!
//! Presets are written in milli-units (mV, mA, ms, µF); the kernel works in
//! µV, nA, fW and samples. Both structs are immutable after construction.

use serde::Serialize;
use vsource_config::{
    Channel, Component, EmulationInput, HarvesterAlgorithm, HarvesterConfig, IvDataKind,
    LUT_SIZE, VirtualSourceConfig,
};

use crate::calibration::CalibrationData;
use crate::error::{BuildError, Result};
use crate::fixed_point::round_f64_to_u32;

pub const MODE_STORAGE: u32 = 0b0001;
pub const MODE_BOOST: u32 = 0b0010;
pub const MODE_BUCK: u32 = 0b0100;
pub const MODE_LOG_INTERMEDIATE: u32 = 0b1000;

pub const HRV_MODE_EMULATION: u32 = 0b01;
pub const HRV_MODE_RISING: u32 = 0b10;

/// Largest inverse efficiency stored in the output table (n4).
const LUT_OUT_INV_MAX_N4: u32 = 1 << 14;
/// Efficiency floor before inversion.
const LUT_OUT_ETA_MIN: f64 = 1.0 / 1024.0;

#[inline]
fn mv_to_uv(mv: f64) -> u32 {
    round_f64_to_u32(mv * 1e3)
}

#[inline]
fn ms_to_samples(ms: f64, samplerate_sps: f64) -> u32 {
    round_f64_to_u32((ms * samplerate_sps / 1e3).floor())
}

/// Converter parameter block, field for field what the real-time core consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConverterParameters {
    pub converter_mode: u32,
    pub interval_startup_delay_drain_n: u32,

    pub v_input_max_uv: u32,
    pub i_input_max_na: u32,
    pub v_input_drop_uv: u32,
    pub constant_1k_per_ohm: u32,

    pub constant_us_per_nf_n28: u32,
    pub v_intermediate_init_uv: u32,
    pub i_intermediate_leak_na: u32,

    pub v_enable_output_threshold_uv: u32,
    pub v_disable_output_threshold_uv: u32,
    pub dv_enable_output_uv: u32,
    pub interval_check_thresholds_n: u32,

    pub v_pwr_good_enable_threshold_uv: u32,
    pub v_pwr_good_disable_threshold_uv: u32,
    pub immediate_pwr_good_signal: bool,

    pub v_output_log_gpio_threshold_uv: u32,

    pub v_input_boost_threshold_uv: u32,
    pub v_intermediate_max_uv: u32,

    pub v_output_uv: u32,
    pub v_buck_drop_uv: u32,

    pub lut_input_v_min_log2_uv: u32,
    pub lut_input_i_min_log2_na: u32,
    pub lut_output_i_min_log2_na: u32,
    pub lut_inp_efficiency_n8: [[u8; LUT_SIZE]; LUT_SIZE],
    pub lut_out_inv_efficiency_n4: [u32; LUT_SIZE],
}

impl ConverterParameters {
    pub fn from_config(cfg: &VirtualSourceConfig, samplerate_sps: f64) -> Result<Self> {
        if !(samplerate_sps.is_finite() && samplerate_sps > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "samplerate_sps must be > 0",
            )));
        }
        if cfg.enable_boost() && !cfg.enable_storage {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "boost converter requires enable_storage",
            )));
        }
        if cfg.enable_storage && cfg.c_intermediate_uf <= 0.0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "enable_storage requires c_intermediate_uf > 0",
            )));
        }

        let converter_mode = u32::from(cfg.enable_storage) * MODE_STORAGE
            | u32::from(cfg.enable_boost()) * MODE_BOOST
            | u32::from(cfg.enable_buck()) * MODE_BUCK
            | u32::from(cfg.log_intermediate_voltage) * MODE_LOG_INTERMEDIATE;

        let constant_us_per_nf_n28 = if cfg.c_intermediate_uf > 0.0 {
            round_f64_to_u32(1e3 * 2f64.powi(28) / (cfg.c_intermediate_uf * samplerate_sps))
        } else {
            0
        };

        let v_enable_output_threshold_uv = mv_to_uv(cfg.v_enable_output_threshold_mv);
        let v_output_uv = mv_to_uv(cfg.v_output_mv);
        let v_buck_drop_uv = mv_to_uv(cfg.v_buck_drop_mv);
        let dv_enable_output_uv = enable_dip_uv(
            cfg,
            f64::from(v_enable_output_threshold_uv),
            f64::from(v_output_uv) + f64::from(v_buck_drop_uv),
        );

        let mut lut_inp_efficiency_n8 = [[0u8; LUT_SIZE]; LUT_SIZE];
        let (v_input_boost_threshold_uv, lut_input_v_min_log2_uv, lut_input_i_min_log2_na) =
            match &cfg.boost {
                Some(boost) => {
                    for (dst_row, src_row) in lut_inp_efficiency_n8
                        .iter_mut()
                        .zip(&boost.lut_input_efficiency)
                    {
                        for (dst, &eta) in dst_row.iter_mut().zip(src_row) {
                            *dst = u8::try_from(round_f64_to_u32(256.0 * eta).min(255))
                                .unwrap_or(u8::MAX);
                        }
                    }
                    (
                        mv_to_uv(boost.v_input_boost_threshold_mv),
                        boost.lut_input_v_min_log2_uv,
                        boost.lut_input_i_min_log2_na,
                    )
                }
                None => (0, 0, 0),
            };

        let mut lut_out_inv_efficiency_n4 = [0u32; LUT_SIZE];
        let lut_output_i_min_log2_na = match &cfg.buck {
            Some(buck) => {
                for (dst, &eta) in lut_out_inv_efficiency_n4
                    .iter_mut()
                    .zip(&buck.lut_output_efficiency)
                {
                    *dst = round_f64_to_u32(16.0 / eta.max(LUT_OUT_ETA_MIN))
                        .min(LUT_OUT_INV_MAX_N4);
                }
                buck.lut_output_i_min_log2_na
            }
            None => 0,
        };

        let params = Self {
            converter_mode,
            interval_startup_delay_drain_n: ms_to_samples(
                cfg.interval_startup_delay_drain_ms,
                samplerate_sps,
            ),
            v_input_max_uv: mv_to_uv(cfg.v_input_max_mv),
            i_input_max_na: round_f64_to_u32(cfg.i_input_max_ma * 1e6),
            v_input_drop_uv: mv_to_uv(cfg.v_input_drop_mv),
            constant_1k_per_ohm: round_f64_to_u32(1e6 / cfg.r_input_mohm.max(1.0)),
            constant_us_per_nf_n28,
            v_intermediate_init_uv: mv_to_uv(cfg.v_intermediate_init_mv),
            i_intermediate_leak_na: round_f64_to_u32(cfg.i_intermediate_leak_na),
            v_enable_output_threshold_uv,
            v_disable_output_threshold_uv: mv_to_uv(cfg.v_disable_output_threshold_mv),
            dv_enable_output_uv,
            interval_check_thresholds_n: ms_to_samples(
                cfg.interval_check_thresholds_ms,
                samplerate_sps,
            ),
            v_pwr_good_enable_threshold_uv: mv_to_uv(cfg.v_pwr_good_enable_threshold_mv),
            v_pwr_good_disable_threshold_uv: mv_to_uv(cfg.v_pwr_good_disable_threshold_mv),
            immediate_pwr_good_signal: cfg.immediate_pwr_good_signal,
            v_output_log_gpio_threshold_uv: mv_to_uv(cfg.v_output_log_gpio_threshold_mv),
            v_input_boost_threshold_uv,
            v_intermediate_max_uv: mv_to_uv(cfg.v_intermediate_max_mv),
            v_output_uv,
            v_buck_drop_uv,
            lut_input_v_min_log2_uv,
            lut_input_i_min_log2_na,
            lut_output_i_min_log2_na,
            lut_inp_efficiency_n8,
            lut_out_inv_efficiency_n4,
        };
        tracing::debug!(
            source = %cfg.name,
            mode = params.converter_mode,
            c_n28 = params.constant_us_per_nf_n28,
            dv_enable_uv = params.dv_enable_output_uv,
            "converter parameters derived"
        );
        Ok(params)
    }

    #[inline]
    pub const fn enable_storage(&self) -> bool {
        self.converter_mode & MODE_STORAGE != 0
    }

    #[inline]
    pub const fn enable_boost(&self) -> bool {
        self.converter_mode & MODE_BOOST != 0
    }

    #[inline]
    pub const fn enable_buck(&self) -> bool {
        self.converter_mode & MODE_BUCK != 0
    }

    #[inline]
    pub const fn enable_log_intermediate(&self) -> bool {
        self.converter_mode & MODE_LOG_INTERMEDIATE != 0
    }
}

/// Voltage dip on the storage capacitor when the output capacitor is connected.
fn enable_dip_uv(cfg: &VirtualSourceConfig, v_enable_uv: f64, v_buck_target_uv: f64) -> u32 {
    if cfg.c_output_uf <= 0.0 || cfg.c_intermediate_uf <= 0.0 {
        return 0;
    }
    let v_pre = if cfg.enable_buck() {
        v_buck_target_uv
    } else {
        v_enable_uv
    };
    let ratio = cfg.c_output_uf / cfg.c_intermediate_uf;
    let radicand = v_enable_uv.mul_add(v_enable_uv, -(ratio * v_pre * v_pre)).max(0.0);
    round_f64_to_u32(v_enable_uv - radicand.sqrt())
}

/// Harvester parameter block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvesterParameters {
    pub algorithm: HarvesterAlgorithm,
    /// bit0 emulation, bit1 rising sweep
    pub hrv_mode: u32,
    /// Samples per IV curve in emulation, sweep steps when harvesting.
    pub window_size: u32,
    pub voltage_uv: u32,
    pub voltage_min_uv: u32,
    pub voltage_max_uv: u32,
    pub voltage_step_uv: u32,
    pub current_limit_na: u32,
    pub setpoint_n8: u32,
    pub interval_n: u32,
    pub duration_n: u32,
    pub wait_cycles_n: u32,
}

impl HarvesterParameters {
    /// Parameters for recording: the harvester drives the DAC itself.
    pub fn for_harvesting(
        cfg: &HarvesterConfig,
        cal: &CalibrationData,
        samplerate_sps: f64,
    ) -> Result<Self> {
        if cfg.algorithm < HarvesterAlgorithm::IvCurve {
            return Err(eyre::Report::new(BuildError::HarvestAlgorithm {
                name: cfg.name.clone(),
                algorithm: cfg.algorithm,
            }));
        }
        Self::build(cfg, cal, samplerate_sps, None)
    }

    /// Parameters for replaying a recording of kind `input`.
    pub fn for_emulation(
        cfg: &HarvesterConfig,
        cal: &CalibrationData,
        samplerate_sps: f64,
        input: &EmulationInput,
    ) -> Result<Self> {
        if cfg.algorithm <= HarvesterAlgorithm::IvCurve {
            return Err(eyre::Report::new(BuildError::EmulationAlgorithm {
                name: cfg.name.clone(),
                algorithm: cfg.algorithm,
            }));
        }
        if input.dtype == IvDataKind::IscVoc {
            return Err(eyre::Report::new(BuildError::IscVocReplay));
        }
        Self::build(cfg, cal, samplerate_sps, Some(input))
    }

    fn build(
        cfg: &HarvesterConfig,
        cal: &CalibrationData,
        samplerate_sps: f64,
        emulation: Option<&EmulationInput>,
    ) -> Result<Self> {
        if !(samplerate_sps.is_finite() && samplerate_sps > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "samplerate_sps must be > 0",
            )));
        }
        let name = cfg.name.as_str();

        // Below four codes the front end cannot resolve a difference.
        let current_limit_min_ua =
            1e6 * cal.raw_to_value(Component::Harvester, Channel::AdcCurrent, 4);
        let current_limit_ua = raise_to(
            name,
            "current_limit_ua",
            cfg.current_limit_ua,
            current_limit_min_ua,
        );
        let voltage_step_min_mv =
            1e3 * cal.raw_to_value(Component::Harvester, Channel::DacVoltageB, 4);
        let voltage_step_mv = raise_to(
            name,
            "voltage_step_mv",
            cfg.voltage_step_mv,
            voltage_step_min_mv,
        );

        let cycle = f64::from(1 + cfg.wait_cycles);
        let calc_window_samples = cfg.window_samples();
        let mut time_min_ms = cycle * 1e3 / samplerate_sps;
        if emulation.is_some() {
            let window_ms = f64::from(calc_window_samples) * 1e3 / samplerate_sps;
            time_min_ms = time_min_ms.max(window_ms);
        }
        let interval_ms = raise_to(name, "interval_ms", cfg.interval_ms, time_min_ms);
        let duration_ms =
            raise_to(name, "duration_ms", cfg.duration_ms, time_min_ms).min(interval_ms);

        let window_size = match emulation {
            Some(input) => {
                if input.window_samples > 0 && calc_window_samples > input.window_samples {
                    calc_window_samples
                } else {
                    input.window_samples
                }
            }
            None => cfg.window_size,
        };

        let hrv_mode = u32::from(emulation.is_some()) * HRV_MODE_EMULATION
            | u32::from(cfg.rising) * HRV_MODE_RISING;

        let params = Self {
            algorithm: cfg.algorithm,
            hrv_mode,
            window_size,
            voltage_uv: mv_to_uv(cfg.voltage_mv),
            voltage_min_uv: mv_to_uv(cfg.voltage_min_mv),
            voltage_max_uv: mv_to_uv(cfg.voltage_max_mv),
            voltage_step_uv: mv_to_uv(voltage_step_mv),
            current_limit_na: round_f64_to_u32(current_limit_ua * 1e3),
            setpoint_n8: round_f64_to_u32((cfg.setpoint_n * 256.0).clamp(0.0, 255.0)),
            interval_n: ms_to_samples(interval_ms, samplerate_sps),
            duration_n: ms_to_samples(duration_ms, samplerate_sps),
            wait_cycles_n: cfg.wait_cycles,
        };
        tracing::debug!(
            harvester = name,
            algorithm = %params.algorithm,
            window = params.window_size,
            interval_n = params.interval_n,
            duration_n = params.duration_n,
            "harvester parameters derived"
        );
        Ok(params)
    }

    #[inline]
    pub const fn is_emulation(&self) -> bool {
        self.hrv_mode & HRV_MODE_EMULATION != 0
    }

    #[inline]
    pub const fn is_rising(&self) -> bool {
        self.hrv_mode & HRV_MODE_RISING != 0
    }
}

fn raise_to(preset: &str, key: &'static str, value: f64, min: f64) -> f64 {
    if value < min {
        tracing::debug!(preset, key, value, min, "value below minimum, adjusted");
        min
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_conversion_floors() {
        assert_eq!(ms_to_samples(0.015, 100_000.0), 1);
        assert_eq!(ms_to_samples(64.0, 100_000.0), 6_400);
        assert_eq!(ms_to_samples(0.0, 100_000.0), 0);
    }

    #[test]
    fn millivolts_round_to_microvolts() {
        assert_eq!(mv_to_uv(2.3004), 2_300);
        assert_eq!(mv_to_uv(0.0625), 63);
        assert_eq!(mv_to_uv(-1.0), 0);
    }
}
