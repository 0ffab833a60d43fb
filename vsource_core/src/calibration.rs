//! Raw ↔ SI conversion for every ADC/DAC channel of both components.
//!
//! `si = raw * gain + offset`. The reverse direction rounds to the nearest
//! code and clamps to the channel's resolution.

use serde::Serialize;
use vsource_config::{CalPair, CalibrationFile, Channel, Component, ComponentCalibration};

use crate::error::{BuildError, Result};

// Analog front end of the reference hardware.
const R_SHUNT_OHM: f64 = 2.0;
const G_INST_AMP: f64 = 48.0;
const V_REF_ADC: f64 = 4.096;
const G_ADC_I: f64 = 1.25;
const G_ADC_V: f64 = 1.25;
const M_ADC: i32 = 18;
const V_REF_DAC: f64 = 2.5;
const G_DAC: f64 = 2.0;
const M_DAC: i32 = 16;

fn adc_raw_to_current(raw: f64) -> f64 {
    raw * (G_ADC_I * V_REF_ADC) / 2f64.powi(M_ADC) / (R_SHUNT_OHM * G_INST_AMP)
}

fn adc_raw_to_voltage(raw: f64) -> f64 {
    raw * (G_ADC_V * V_REF_ADC) / 2f64.powi(M_ADC)
}

fn dac_raw_to_voltage(raw: f64) -> f64 {
    raw * (V_REF_DAC * G_DAC) / 2f64.powi(M_DAC)
}

fn analytic_pair(channel: Channel) -> CalPair {
    let f: fn(f64) -> f64 = match channel {
        Channel::DacVoltageA | Channel::DacVoltageB => dac_raw_to_voltage,
        Channel::AdcCurrent => adc_raw_to_current,
        Channel::AdcVoltage => adc_raw_to_voltage,
    };
    let offset = f(0.0);
    CalPair {
        gain: f(1.0) - offset,
        offset,
    }
}

const fn component_index(component: Component) -> usize {
    match component {
        Component::Harvester => 0,
        Component::Emulator => 1,
    }
}

const fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::DacVoltageA => 0,
        Channel::DacVoltageB => 1,
        Channel::AdcCurrent => 2,
        Channel::AdcVoltage => 3,
    }
}

/// Validated calibration table, shared read-only by all models.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    pairs: [[CalPair; 4]; 2],
}

impl Default for CalibrationData {
    /// Calibration derived from the nominal analog front end.
    fn default() -> Self {
        let row = Channel::ALL.map(analytic_pair);
        Self { pairs: [row, row] }
    }
}

impl CalibrationData {
    /// Start from the analytic defaults and replace every channel present in `file`.
    pub fn from_file(file: &CalibrationFile) -> Result<Self> {
        let mut cal = Self::default();
        for component in Component::ALL {
            for channel in Channel::ALL {
                if let Some(pair) = file.component(component).get(channel) {
                    cal.set(component, channel, pair)?;
                }
            }
        }
        Ok(cal)
    }

    pub fn set(&mut self, component: Component, channel: Channel, pair: CalPair) -> Result<()> {
        if !pair.gain.is_finite() || pair.gain == 0.0 || !pair.offset.is_finite() {
            return Err(eyre::Report::new(BuildError::ZeroGain {
                component: component.as_str(),
                channel: channel.as_str(),
                gain: pair.gain,
            }));
        }
        self.pairs[component_index(component)][channel_index(channel)] = pair;
        Ok(())
    }

    #[inline]
    pub const fn pair(&self, component: Component, channel: Channel) -> CalPair {
        self.pairs[component_index(component)][channel_index(channel)]
    }

    /// SI value of a raw code. No clamping is applied.
    #[inline]
    pub fn raw_to_value(&self, component: Component, channel: Channel, raw: u32) -> f64 {
        let p = self.pair(component, channel);
        f64::from(raw).mul_add(p.gain, p.offset)
    }

    /// Nearest raw code for an SI value, clamped to the channel's range.
    #[inline]
    pub fn value_to_raw(&self, component: Component, channel: Channel, value: f64) -> u32 {
        let p = self.pair(component, channel);
        let raw = ((value - p.offset) / p.gain).round();
        if raw.is_nan() || raw <= 0.0 {
            0
        } else if raw >= f64::from(channel.max_raw()) {
            channel.max_raw()
        } else {
            raw as u32
        }
    }

    /// Emulator output-current ADC code to nA.
    #[inline]
    pub fn adc_raw_to_na(&self, raw: u32) -> f64 {
        self.raw_to_value(Component::Emulator, Channel::AdcCurrent, raw) * 1e9
    }

    /// Emulator voltage ADC code to µV.
    #[inline]
    pub fn adc_raw_to_uv(&self, raw: u32) -> f64 {
        self.raw_to_value(Component::Emulator, Channel::AdcVoltage, raw) * 1e6
    }

    /// nA to emulator output-current ADC code.
    #[inline]
    pub fn na_to_adc_raw(&self, current_na: f64) -> u32 {
        self.value_to_raw(Component::Emulator, Channel::AdcCurrent, current_na * 1e-9)
    }

    /// µV to the emulator output DAC code (16 bit).
    #[inline]
    pub fn uv_to_dac_raw(&self, voltage_uv: f64) -> u32 {
        self.value_to_raw(Component::Emulator, Channel::DacVoltageB, voltage_uv * 1e-6)
    }

    /// Emulator output DAC code to µV.
    #[inline]
    pub fn dac_raw_to_uv(&self, raw: u32) -> f64 {
        self.raw_to_value(Component::Emulator, Channel::DacVoltageB, raw) * 1e6
    }

    /// Integer calibration block consumed by the real-time core.
    pub fn export_for_kernel(&self) -> Result<KernelCalibration> {
        let cur = self.pair(Component::Emulator, Channel::AdcCurrent);
        let dac = self.pair(Component::Emulator, Channel::DacVoltageB);
        Ok(KernelCalibration {
            adc_current_factor_na_n8: to_u32(
                "adc_current_factor_na_n8",
                (1e9 * 256.0 * cur.gain).trunc(),
            )?,
            adc_current_offset_na: to_i32("adc_current_offset_na", (1e9 * cur.offset).trunc())?,
            dac_voltage_inv_factor_uv_n20: to_u32(
                "dac_voltage_inv_factor_uv_n20",
                (2f64.powi(20) / (1e6 * dac.gain)).trunc(),
            )?,
            dac_voltage_offset_uv: to_i32("dac_voltage_offset_uv", (1e6 * dac.offset).trunc())?,
        })
    }

    /// Full table in file form, every channel present.
    pub fn to_file(&self) -> CalibrationFile {
        let mut file = CalibrationFile::default();
        for component in Component::ALL {
            let target: &mut ComponentCalibration = file.component_mut(component);
            for channel in Channel::ALL {
                target.set(channel, self.pair(component, channel));
            }
        }
        file
    }
}

fn to_u32(field: &'static str, value: f64) -> Result<u32> {
    if value.is_finite() && (0.0..=f64::from(u32::MAX)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(eyre::Report::new(BuildError::KernelOverflow {
            field,
            value,
            ty: "u32",
        }))
    }
}

fn to_i32(field: &'static str, value: f64) -> Result<i32> {
    if value.is_finite() && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&value) {
        Ok(value as i32)
    } else {
        Err(eyre::Report::new(BuildError::KernelOverflow {
            field,
            value,
            ty: "i32",
        }))
    }
}

/// Integer calibration for the emulator's output current ADC and voltage DAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelCalibration {
    pub adc_current_factor_na_n8: u32,
    pub adc_current_offset_na: i32,
    pub dac_voltage_inv_factor_uv_n20: u32,
    pub dac_voltage_offset_uv: i32,
}
