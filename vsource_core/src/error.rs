use thiserror::Error;
use vsource_config::HarvesterAlgorithm;

/// Problems found while turning configuration and calibration into kernel
/// parameter blocks. Once a model is built, stepping it cannot fail.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error(
        "harvester '{name}' uses '{algorithm}'; emulation needs an algorithm above ivcurve (cv, mppt_voc, mppt_po, mppt_opt)"
    )]
    EmulationAlgorithm {
        name: String,
        algorithm: HarvesterAlgorithm,
    },
    #[error(
        "harvester '{name}' uses '{algorithm}'; harvesting needs ivcurve or a tracking algorithm"
    )]
    HarvestAlgorithm {
        name: String,
        algorithm: HarvesterAlgorithm,
    },
    #[error("isc_voc recordings cannot be replayed by the emulator")]
    IscVocReplay,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("calibration gain of {component}.{channel} must be finite and non-zero, got {gain}")]
    ZeroGain {
        component: &'static str,
        channel: &'static str,
        gain: f64,
    },
    #[error("kernel calibration field {field} = {value} does not fit {ty}")]
    KernelOverflow {
        field: &'static str,
        value: f64,
        ty: &'static str,
    },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
