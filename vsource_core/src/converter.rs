//! Boost/buck converter state machine.
//!
//! Each sample runs four steps in fixed order: [`VirtualConverter::calc_inp_power`],
//! [`VirtualConverter::calc_out_power`], [`VirtualConverter::update_cap_storage`] and
//! [`VirtualConverter::update_states_and_output`].
//!
//! ## Fixed-point state
//!
//! - storage voltage `v_mid_uv_n32`: µV with 32 fractional bits
//! - powers `p_*_fw_n8`: fW with 8 fractional bits
//!
//! Products are formed in `u128`/`i128` and saturate on narrowing. Every value
//! handed out as a plain integer is rounded half away from zero.

use std::sync::Arc;

use vsource_config::{Channel, LUT_SIZE};

use crate::calibration::CalibrationData;
use crate::fixed_point::{
    clamp_i64_to_u32, log2_floor, round_f64_to_u32, round_shift_u64, round_shift_u128,
    saturate_u32,
};
use crate::params::ConverterParameters;

const ONE_UV_N32: u64 = 1 << 32;
const LUT_LAST: u32 = LUT_SIZE as u32 - 1;
/// Neutral efficiency: 1.0 in n8.
const ETA_ONE_N8: u64 = 1 << 8;
/// Neutral inverse efficiency: 1.0 in n4.
const ETA_INV_ONE_N4: u64 = 1 << 4;
/// Threshold counter start, so the first sample always evaluates thresholds.
const SAMPLE_COUNT_START: u32 = 0xFFFF_FFF0;

#[inline]
const fn uv_to_n32(uv: u32) -> u64 {
    (uv as u64) << 32
}

#[inline]
fn n32_to_uv(v_n32: u64) -> u32 {
    saturate_u32(round_shift_u64(v_n32, 32))
}

#[derive(Debug, Clone)]
struct ConverterState {
    v_input_uv: u32,
    p_inp_fw_n8: u64,
    p_out_fw_n8: u64,
    v_mid_uv_n32: u64,
    v_out_dac_uv: u32,
    v_out_dac_raw: u32,
    interval_startup_disabled_drain_n: u32,
    v_enable_output_threshold_uv: u32,
    sample_count: u32,
    is_outputting: bool,
    power_good: bool,
    skip_gpio_logging: bool,
}

/// Converter model driven once per sample.
#[derive(Debug, Clone)]
pub struct VirtualConverter {
    cfg: Arc<ConverterParameters>,
    cal: Arc<CalibrationData>,
    state: ConverterState,
}

impl VirtualConverter {
    pub fn new(cfg: Arc<ConverterParameters>, cal: Arc<CalibrationData>) -> Self {
        // enable threshold is at least the output capacitor dip
        let v_enable_output_threshold_uv = cfg
            .v_enable_output_threshold_uv
            .max(cfg.dv_enable_output_uv);
        let state = ConverterState {
            v_input_uv: 0,
            p_inp_fw_n8: 0,
            p_out_fw_n8: 0,
            v_mid_uv_n32: uv_to_n32(cfg.v_intermediate_init_uv),
            v_out_dac_uv: cfg.v_output_uv,
            v_out_dac_raw: cal.uv_to_dac_raw(f64::from(cfg.v_output_uv)),
            interval_startup_disabled_drain_n: cfg.interval_startup_delay_drain_n,
            v_enable_output_threshold_uv,
            sample_count: SAMPLE_COUNT_START,
            is_outputting: true,
            power_good: true,
            skip_gpio_logging: false,
        };
        Self { cfg, cal, state }
    }

    pub fn params(&self) -> &ConverterParameters {
        &self.cfg
    }

    /// Harvested power entering the storage, in fW.
    pub fn calc_inp_power(&mut self, input_voltage_uv: i64, input_current_na: i64) -> u64 {
        let cfg = &*self.cfg;
        let st = &mut self.state;

        let mut voltage_uv = clamp_i64_to_u32(input_voltage_uv)
            .saturating_sub(cfg.v_input_drop_uv)
            .min(cfg.v_input_max_uv);
        let mut current_na = clamp_i64_to_u32(input_current_na).min(cfg.i_input_max_na);
        st.v_input_uv = voltage_uv;

        if cfg.enable_boost() {
            if voltage_uv < cfg.v_input_boost_threshold_uv {
                voltage_uv = 0;
            }
            if uv_to_n32(voltage_uv) > st.v_mid_uv_n32 {
                voltage_uv = n32_to_uv(st.v_mid_uv_n32);
            }
        } else if !cfg.enable_storage() {
            // direct connection
            st.v_mid_uv_n32 = uv_to_n32(voltage_uv);
            voltage_uv = 0;
        } else if uv_to_n32(voltage_uv) > st.v_mid_uv_n32 {
            let dv_n32 = u128::from(uv_to_n32(voltage_uv) - st.v_mid_uv_n32);
            let limit_na = saturate_u32(round_shift_u128(
                dv_n32 * u128::from(cfg.constant_1k_per_ohm),
                32,
            ));
            current_na = current_na.min(limit_na);
            voltage_uv = n32_to_uv(st.v_mid_uv_n32);
        } else {
            voltage_uv = 0;
        }

        let eta_n8 = if cfg.enable_boost() {
            u64::from(self.get_input_efficiency(voltage_uv, current_na))
        } else {
            ETA_ONE_N8
        };
        let p_n8 = u128::from(eta_n8) * u128::from(voltage_uv) * u128::from(current_na);
        let st = &mut self.state;
        st.p_inp_fw_n8 = u64::try_from(p_n8).unwrap_or(u64::MAX);
        round_shift_u64(st.p_inp_fw_n8, 8)
    }

    /// Power drawn from the storage by the load plus leakage, in fW.
    pub fn calc_out_power(&mut self, current_adc_raw: i64) -> u64 {
        let raw = clamp_i64_to_u32(current_adc_raw).min(Channel::AdcCurrent.max_raw());
        let current_na = round_f64_to_u32(self.cal.adc_raw_to_na(raw));

        let eta_inv_n4 = if self.cfg.enable_buck() {
            u64::from(self.get_output_inv_efficiency(current_na))
        } else {
            ETA_INV_ONE_N4
        };

        let cfg = &*self.cfg;
        let st = &mut self.state;
        let p_leak_n8 = u128::from(round_shift_u128(
            u128::from(st.v_mid_uv_n32) * u128::from(cfg.i_intermediate_leak_na),
            24,
        ));
        let p_load_n8 =
            (u128::from(eta_inv_n4) * u128::from(st.v_out_dac_uv) * u128::from(current_na)) << 4;
        st.p_out_fw_n8 = u64::try_from(p_load_n8.saturating_add(p_leak_n8)).unwrap_or(u64::MAX);

        if st.interval_startup_disabled_drain_n > 0 {
            st.interval_startup_disabled_drain_n -= 1;
            st.p_out_fw_n8 = 0;
        }
        round_shift_u64(st.p_out_fw_n8, 8)
    }

    /// Integrate the power balance into the storage voltage; returns V_mid in µV.
    pub fn update_cap_storage(&mut self) -> u32 {
        let cfg = &*self.cfg;
        let st = &mut self.state;

        if cfg.enable_storage() {
            let v_mid_prot_n32 = i128::from(st.v_mid_uv_n32.max(ONE_UV_N32));
            let p_sum_n8 = i128::from(st.p_inp_fw_n8) - i128::from(st.p_out_fw_n8);
            let dv_n32 = p_sum_n8
                .saturating_mul(i128::from(cfg.constant_us_per_nf_n28))
                .saturating_mul(1 << 28)
                / v_mid_prot_n32;
            let v_mid = i128::from(st.v_mid_uv_n32).saturating_add(dv_n32);
            st.v_mid_uv_n32 = u64::try_from(v_mid.max(0)).unwrap_or(u64::MAX);
        }

        let v_max_n32 = uv_to_n32(cfg.v_intermediate_max_uv);
        if st.v_mid_uv_n32 > v_max_n32 {
            st.v_mid_uv_n32 = v_max_n32;
        }
        if !cfg.enable_boost() && st.p_inp_fw_n8 > 0 && st.v_mid_uv_n32 > uv_to_n32(st.v_input_uv)
        {
            st.v_mid_uv_n32 = uv_to_n32(st.v_input_uv);
        } else if st.v_mid_uv_n32 < ONE_UV_N32 {
            st.v_mid_uv_n32 = ONE_UV_N32;
        }
        n32_to_uv(st.v_mid_uv_n32)
    }

    /// Output hysteresis, power-good and regulation; returns the output DAC code.
    pub fn update_states_and_output(&mut self) -> u32 {
        let cfg = &*self.cfg;
        let st = &mut self.state;

        st.sample_count = st.sample_count.wrapping_add(1);
        let check_thresholds = st.sample_count >= cfg.interval_check_thresholds_n;

        if check_thresholds {
            st.sample_count = 0;
            if st.is_outputting {
                if st.v_mid_uv_n32 < uv_to_n32(cfg.v_disable_output_threshold_uv) {
                    st.is_outputting = false;
                    tracing::trace!(v_mid_uv = n32_to_uv(st.v_mid_uv_n32), "output disabled");
                }
            } else if st.v_mid_uv_n32 >= uv_to_n32(st.v_enable_output_threshold_uv) {
                st.is_outputting = true;
                st.v_mid_uv_n32 = st
                    .v_mid_uv_n32
                    .saturating_sub(uv_to_n32(cfg.dv_enable_output_uv));
                tracing::trace!(v_mid_uv = n32_to_uv(st.v_mid_uv_n32), "output enabled");
            }
        }

        if check_thresholds || cfg.immediate_pwr_good_signal {
            if st.power_good {
                if st.v_mid_uv_n32 <= uv_to_n32(cfg.v_pwr_good_disable_threshold_uv) {
                    st.power_good = false;
                }
            } else if st.v_mid_uv_n32 >= uv_to_n32(cfg.v_pwr_good_enable_threshold_uv) {
                st.power_good = st.is_outputting;
            }
        }

        if st.is_outputting || st.interval_startup_disabled_drain_n > 0 {
            let v_buck_limit_n32 =
                uv_to_n32(cfg.v_output_uv.saturating_add(cfg.v_buck_drop_uv));
            st.v_out_dac_uv = if !cfg.enable_buck() || st.v_mid_uv_n32 <= v_buck_limit_n32 {
                n32_to_uv(
                    st.v_mid_uv_n32
                        .saturating_sub(uv_to_n32(cfg.v_buck_drop_uv)),
                )
            } else {
                cfg.v_output_uv
            };
            st.v_out_dac_raw = self.cal.uv_to_dac_raw(f64::from(st.v_out_dac_uv));
        } else {
            st.v_out_dac_uv = 0;
            st.v_out_dac_raw = 0;
        }

        st.skip_gpio_logging = st.v_out_dac_uv < cfg.v_output_log_gpio_threshold_uv;
        st.v_out_dac_raw
    }

    /// Input efficiency (n8) for a boosted operating point.
    pub fn get_input_efficiency(&self, voltage_uv: u32, current_na: u32) -> u8 {
        let cfg = &*self.cfg;
        let pos_v = voltage_uv
            .checked_shr(cfg.lut_input_v_min_log2_uv)
            .unwrap_or(0)
            .min(LUT_LAST);
        let pos_c = log2_floor(
            current_na
                .checked_shr(cfg.lut_input_i_min_log2_na)
                .unwrap_or(0),
        )
        .min(LUT_LAST);
        cfg.lut_inp_efficiency_n8[pos_v as usize][pos_c as usize]
    }

    /// Inverse output efficiency (n4) for a load current.
    pub fn get_output_inv_efficiency(&self, current_na: u32) -> u32 {
        let cfg = &*self.cfg;
        let pos_c = log2_floor(
            current_na
                .checked_shr(cfg.lut_output_i_min_log2_na)
                .unwrap_or(0),
        )
        .min(LUT_LAST);
        cfg.lut_out_inv_efficiency_n4[pos_c as usize]
    }

    pub fn p_input_fw(&self) -> u64 {
        round_shift_u64(self.state.p_inp_fw_n8, 8)
    }

    pub fn p_output_fw(&self) -> u64 {
        round_shift_u64(self.state.p_out_fw_n8, 8)
    }

    pub fn v_intermediate_uv(&self) -> u32 {
        n32_to_uv(self.state.v_mid_uv_n32)
    }

    /// Storage voltage as an output DAC code.
    pub fn v_intermediate_raw(&self) -> u32 {
        self.cal
            .uv_to_dac_raw(f64::from(self.v_intermediate_uv()))
    }

    /// Input voltage after drop and limits, before topology adjustments.
    pub fn v_input_uv(&self) -> u32 {
        self.state.v_input_uv
    }

    pub fn v_out_dac_uv(&self) -> u32 {
        self.state.v_out_dac_uv
    }

    pub fn v_out_dac_raw(&self) -> u32 {
        self.state.v_out_dac_raw
    }

    pub fn power_good(&self) -> bool {
        self.state.power_good
    }

    pub fn is_outputting(&self) -> bool {
        self.state.is_outputting
    }

    pub fn log_intermediate(&self) -> bool {
        self.cfg.enable_log_intermediate()
    }

    pub fn skip_gpio_logging(&self) -> bool {
        self.state.skip_gpio_logging
    }

    /// Current the modeled output draws from the storage, in nA.
    pub fn i_mod_out_na(&self) -> u32 {
        let v_mid = u128::from(self.state.v_mid_uv_n32.max(ONE_UV_N32));
        let i = ((u128::from(self.state.p_out_fw_n8) << 24) + v_mid / 2) / v_mid;
        saturate_u32(u64::try_from(i).unwrap_or(u64::MAX))
    }

    pub fn set_p_input_fw(&mut self, value: u64) {
        self.state.p_inp_fw_n8 = value.saturating_mul(1 << 8);
    }

    pub fn set_p_output_fw(&mut self, value: u64) {
        self.state.p_out_fw_n8 = value.saturating_mul(1 << 8);
    }

    pub fn set_v_intermediate_uv(&mut self, value: u32) {
        self.state.v_mid_uv_n32 = uv_to_n32(value);
    }
}
