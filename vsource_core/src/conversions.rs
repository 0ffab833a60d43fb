//! `TryFrom` bridges from validated config types to kernel blocks.

use vsource_config::{CalibrationFile, VirtualSourceConfig};

use crate::calibration::CalibrationData;
use crate::error::Report;
use crate::params::ConverterParameters;

impl TryFrom<&CalibrationFile> for CalibrationData {
    type Error = Report;

    fn try_from(file: &CalibrationFile) -> Result<Self, Self::Error> {
        Self::from_file(file)
    }
}

/// Uses the source's own `samplerate_sps`.
impl TryFrom<&VirtualSourceConfig> for ConverterParameters {
    type Error = Report;

    fn try_from(cfg: &VirtualSourceConfig) -> Result<Self, Self::Error> {
        Self::from_config(cfg, cfg.samplerate_sps)
    }
}
