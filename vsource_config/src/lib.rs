#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Preset catalog, config schemas and calibration parsing for the virtual source.
//!
//! - Harvester and source presets live in a TOML catalog. Every preset may name a
//!   `base` preset; chains are flattened once (child keys win) and end at `neutral`.
//! - Flattened presets are deserialized into typed configs and clamped into their
//!   documented ranges. Clamping is logged at `debug`, negative values are rejected.
//! - Calibration files (TOML) and bench measurements (CSV) are parsed here; the
//!   linear fit for measurements rejects outliers before the final slope/intercept.

pub mod atomic;
pub mod calibration;
pub mod error;
pub mod harvester;
pub mod preset;
mod range;
pub mod source;

pub use calibration::{
    CalPair, CalibrationFile, Channel, Component, ComponentCalibration, MeasurementRow,
    fit_measurements, fit_pair, load_calibration_toml, load_measurements_csv, write_calibration_toml,
};
pub use error::ConfigError;
pub use harvester::{EmulationInput, HarvesterAlgorithm, HarvesterConfig, IvDataKind};
pub use preset::{Catalog, NEUTRAL, PresetKind, Resolved};
pub use source::{BoostStage, BuckStage, LUT_SIZE, VirtualSourceConfig};
