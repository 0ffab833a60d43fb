//! Calibration file format and the bench-measurement fit.
//!
//! A calibration file holds one `gain`/`offset` pair per component and channel:
//!
//! ```toml
//! [emulator.adc_current]
//! gain = 1.7881393e-7
//! offset = -8.9407e-7
//! ```
//!
//! Channels that are missing fall back to the analytic defaults of the core.
//! Measurement CSVs are fitted per channel with ordinary least squares and a
//! single robust refit.

use std::collections::BTreeMap;
use std::path::Path;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Harvester,
    Emulator,
}

impl Component {
    pub const ALL: [Self; 2] = [Self::Harvester, Self::Emulator];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Harvester => "harvester",
            Self::Emulator => "emulator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DacVoltageA,
    DacVoltageB,
    AdcCurrent,
    AdcVoltage,
}

impl Channel {
    pub const ALL: [Self; 4] = [
        Self::DacVoltageA,
        Self::DacVoltageB,
        Self::AdcCurrent,
        Self::AdcVoltage,
    ];

    /// Converter resolution in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::DacVoltageA | Self::DacVoltageB => 16,
            Self::AdcCurrent | Self::AdcVoltage => 18,
        }
    }

    pub const fn max_raw(self) -> u32 {
        (1 << self.bits()) - 1
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DacVoltageA => "dac_voltage_a",
            Self::DacVoltageB => "dac_voltage_b",
            Self::AdcCurrent => "adc_current",
            Self::AdcVoltage => "adc_voltage",
        }
    }
}

/// `si = raw * gain + offset`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CalPair {
    pub gain: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentCalibration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dac_voltage_a: Option<CalPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dac_voltage_b: Option<CalPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adc_current: Option<CalPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adc_voltage: Option<CalPair>,
}

impl ComponentCalibration {
    pub const fn get(&self, channel: Channel) -> Option<CalPair> {
        match channel {
            Channel::DacVoltageA => self.dac_voltage_a,
            Channel::DacVoltageB => self.dac_voltage_b,
            Channel::AdcCurrent => self.adc_current,
            Channel::AdcVoltage => self.adc_voltage,
        }
    }

    pub fn set(&mut self, channel: Channel, pair: CalPair) {
        match channel {
            Channel::DacVoltageA => self.dac_voltage_a = Some(pair),
            Channel::DacVoltageB => self.dac_voltage_b = Some(pair),
            Channel::AdcCurrent => self.adc_current = Some(pair),
            Channel::AdcVoltage => self.adc_voltage = Some(pair),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationFile {
    #[serde(default)]
    pub harvester: ComponentCalibration,
    #[serde(default)]
    pub emulator: ComponentCalibration,
}

impl CalibrationFile {
    pub const fn component(&self, component: Component) -> &ComponentCalibration {
        match component {
            Component::Harvester => &self.harvester,
            Component::Emulator => &self.emulator,
        }
    }

    pub const fn component_mut(&mut self, component: Component) -> &mut ComponentCalibration {
        match component {
            Component::Harvester => &mut self.harvester,
            Component::Emulator => &mut self.emulator,
        }
    }

    pub fn to_toml_string(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).wrap_err("serialize calibration")
    }
}

pub fn load_calibration_toml(path: &Path) -> eyre::Result<CalibrationFile> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read calibration file {}", path.display()))?;
    toml::from_str(&text).wrap_err_with(|| format!("parse calibration file {}", path.display()))
}

/// Write `file` as TOML, replacing `path` atomically.
pub fn write_calibration_toml(path: &Path, file: &CalibrationFile) -> eyre::Result<()> {
    let text = file.to_toml_string()?;
    write_atomic(path, text.as_bytes())
        .wrap_err_with(|| format!("write calibration file {}", path.display()))
}

/// One bench reading: the instrument's SI value next to the raw code.
///
/// Expected headers:
/// component,channel,reference_si,raw
///
/// Example:
/// component,channel,reference_si,raw
/// emulator,adc_current,0.000010,1502
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MeasurementRow {
    pub component: Component,
    pub channel: Channel,
    pub reference_si: f64,
    pub raw: i64,
}

const MEASUREMENT_HEADERS: [&str; 4] = ["component", "channel", "reference_si", "raw"];

pub fn load_measurements_csv(path: &Path) -> eyre::Result<Vec<MeasurementRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("open measurement CSV {}", path.display()))?;

    let headers = rdr
        .headers()
        .wrap_err_with(|| format!("read CSV headers {}", path.display()))?
        .clone();
    let actual: Vec<&str> = headers.iter().collect();
    if actual != MEASUREMENT_HEADERS {
        eyre::bail!(
            "measurement CSV must have headers '{}', got: {}",
            MEASUREMENT_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<MeasurementRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    Ok(rows)
}

/// Fit every (component, channel) present in `rows`.
pub fn fit_measurements(rows: &[MeasurementRow]) -> eyre::Result<CalibrationFile> {
    let mut groups: BTreeMap<(Component, Channel), Vec<(f64, f64)>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.component, row.channel))
            .or_default()
            .push((row.raw as f64, row.reference_si));
    }
    if groups.is_empty() {
        eyre::bail!("no calibration measurements");
    }
    let mut file = CalibrationFile::default();
    for ((component, channel), pts) in groups {
        let pair = fit_pair(&pts).wrap_err_with(|| {
            format!("fit {}.{}", component.as_str(), channel.as_str())
        })?;
        tracing::info!(
            component = component.as_str(),
            channel = channel.as_str(),
            points = pts.len(),
            gain = pair.gain,
            offset = pair.offset,
            "calibration channel fitted"
        );
        file.component_mut(component).set(channel, pair);
    }
    Ok(file)
}

/// Least-squares fit of `si = gain * raw + offset` over `(raw, si)` points.
///
/// After the first fit, points with a residual beyond 2σ are dropped and the
/// line is fitted once more, provided at least two points remain.
pub fn fit_pair(pts: &[(f64, f64)]) -> eyre::Result<CalPair> {
    if pts.len() < 2 {
        eyre::bail!("calibration requires at least two points, got {}", pts.len());
    }
    if pts.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        eyre::bail!("calibration points must be finite");
    }
    let (a0, b0) = ols(pts)?;

    let sumsq: f64 = pts
        .iter()
        .map(|(x, y)| {
            let r = y - a0.mul_add(*x, b0);
            r * r
        })
        .sum();
    let rms = (sumsq / pts.len() as f64).sqrt();

    let (gain, offset) = robust_refit(pts, a0, b0, rms, 2.0).unwrap_or((a0, b0));
    Ok(CalPair { gain, offset })
}

fn ols(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration needs at least two distinct raw values");
    }
    let a = sxy / sxx;
    if !a.is_finite() || a == 0.0 {
        eyre::bail!("calibration produced a zero or non-finite gain");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Refit over the inliers `|residual| <= k * rms` of `y = a0 * x + b0`.
///
/// Returns `None` when nothing was rejected or fewer than two inliers remain.
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let inliers: Vec<(f64, f64)> = pts
        .iter()
        .copied()
        .filter(|(x, y)| (y - a0.mul_add(*x, b0)).abs() <= thr)
        .collect();
    if inliers.len() < 2 || inliers.len() == pts.len() {
        return None;
    }
    tracing::debug!(
        rejected = pts.len() - inliers.len(),
        "calibration outliers rejected"
    );
    ols(&inliers).ok()
}
