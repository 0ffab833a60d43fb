//! Source orchestrator: harvester, converter and calibration per sample.

use std::sync::Arc;

use vsource_config::{Catalog, EmulationInput, HarvesterConfig, VirtualSourceConfig};

use crate::calibration::CalibrationData;
use crate::converter::VirtualConverter;
use crate::error::Result;
use crate::fixed_point::round_f64_to_u32;
use crate::harvester::VirtualHarvester;
use crate::params::{ConverterParameters, HarvesterParameters};

/// Raw V·I sums of the harvested and delivered side.
///
/// Diagnostic only; the converter's own efficiency-weighted power is not
/// touched by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnergyAccumulator {
    harvested_fw_samples: u128,
    delivered_fw_samples: u128,
    samples: u64,
}

impl EnergyAccumulator {
    pub fn record(&mut self, v_in_uv: u32, i_in_na: u32, v_out_uv: u32, i_out_na: u32) {
        self.harvested_fw_samples += u128::from(v_in_uv) * u128::from(i_in_na);
        self.delivered_fw_samples += u128::from(v_out_uv) * u128::from(i_out_na);
        self.samples += 1;
    }

    pub const fn samples(&self) -> u64 {
        self.samples
    }

    pub fn harvested_energy_j(&self, samplerate_sps: f64) -> f64 {
        self.harvested_fw_samples as f64 * 1e-15 / samplerate_sps
    }

    pub fn delivered_energy_j(&self, samplerate_sps: f64) -> f64 {
        self.delivered_fw_samples as f64 * 1e-15 / samplerate_sps
    }
}

/// One emulated virtual source.
#[derive(Debug, Clone)]
pub struct SourceModel {
    harvester: VirtualHarvester,
    converter: VirtualConverter,
    cal: Arc<CalibrationData>,
    samplerate_sps: f64,
    accumulator: Option<EnergyAccumulator>,
}

impl SourceModel {
    /// Build a model replaying `input` through `source` and its harvester.
    pub fn new(
        source: &VirtualSourceConfig,
        harvester: &HarvesterConfig,
        cal: Arc<CalibrationData>,
        input: &EmulationInput,
    ) -> Result<Self> {
        let sps = source.samplerate_sps;
        let cnv = Arc::new(ConverterParameters::from_config(source, sps)?);
        let hrv = Arc::new(HarvesterParameters::for_emulation(harvester, &cal, sps, input)?);
        tracing::info!(
            source = %source.name,
            harvester = %harvester.name,
            algorithm = %harvester.algorithm,
            samplerate_sps = sps,
            window_samples = hrv.window_size,
            "source model created"
        );
        Ok(Self::from_parts(cnv, hrv, cal, sps))
    }

    /// Resolve `source` (and the harvester it names) from `catalog`.
    pub fn from_catalog(
        catalog: &Catalog,
        source: &str,
        cal: Arc<CalibrationData>,
        input: &EmulationInput,
    ) -> Result<Self> {
        let src = catalog.source(source)?;
        let hrv = catalog.harvester(&src.harvester)?;
        Self::new(&src, &hrv, cal, input)
    }

    /// Assemble from prepared parameter blocks; blocks may be shared between models.
    pub fn from_parts(
        converter: Arc<ConverterParameters>,
        harvester: Arc<HarvesterParameters>,
        cal: Arc<CalibrationData>,
        samplerate_sps: f64,
    ) -> Self {
        Self {
            harvester: VirtualHarvester::new(harvester),
            converter: VirtualConverter::new(converter, Arc::clone(&cal)),
            cal,
            samplerate_sps,
            accumulator: None,
        }
    }

    #[must_use]
    pub fn with_accumulator(mut self) -> Self {
        self.enable_accumulator();
        self
    }

    /// Start energy bookkeeping; a running accumulator is kept.
    pub fn enable_accumulator(&mut self) {
        self.accumulator.get_or_insert_with(EnergyAccumulator::default);
    }

    /// Advance one sample; returns the output voltage in µV.
    pub fn step(&mut self, v_in_uv: u32, i_in_na: u32, i_out_na: u32) -> u32 {
        let (v_hrv_uv, i_hrv_na) = self.harvester.iv_sample(v_in_uv, i_in_na);
        self.converter
            .calc_inp_power(i64::from(v_hrv_uv), i64::from(i_hrv_na));

        let i_out_raw = self.cal.na_to_adc_raw(f64::from(i_out_na));
        self.converter.calc_out_power(i64::from(i_out_raw));
        self.converter.update_cap_storage();
        let v_out_raw = self.converter.update_states_and_output();
        let v_out_uv = round_f64_to_u32(self.cal.dac_raw_to_uv(v_out_raw));

        if let Some(acc) = self.accumulator.as_mut() {
            acc.record(v_hrv_uv, i_hrv_na, v_out_uv, i_out_na);
        }
        v_out_uv
    }

    pub const fn samplerate_sps(&self) -> f64 {
        self.samplerate_sps
    }

    pub const fn converter(&self) -> &VirtualConverter {
        &self.converter
    }

    /// Mutable access for the converter's test hooks.
    pub const fn converter_mut(&mut self) -> &mut VirtualConverter {
        &mut self.converter
    }

    pub const fn harvester(&self) -> &VirtualHarvester {
        &self.harvester
    }

    pub const fn accumulator(&self) -> Option<&EnergyAccumulator> {
        self.accumulator.as_ref()
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.cal
    }
}
