#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Sample-accurate reference model of the virtual source pipeline.
//!
//! A virtual source is a harvesting stage feeding a boost/buck converter with a
//! storage capacitor. This crate reproduces the integer control loop of the
//! emulator's real-time core so recordings can be replayed on a host.
//!
//! ## Architecture
//!
//! - **Calibration**: raw ↔ SI per channel (`calibration` module)
//! - **Parameters**: kernel blocks derived once from presets (`params`)
//! - **Harvester**: operating point selection on replayed IV curves (`harvester`)
//! - **Converter**: storage integration, hysteresis and regulation (`converter`)
//! - **Source**: the per-sample pipeline (`source`)
//! - **Runner**: trace replay, including several models on scoped threads (`runner`)
//!
//! ## Fixed-Point Arithmetic
//!
//! The storage voltage is kept in µV with 32 fractional bits, powers in fW with
//! 8 fractional bits. See `fixed_point` for rounding helpers.

pub mod calibration;
pub mod conversions;
pub mod converter;
pub mod error;
pub mod fixed_point;
pub mod harvester;
pub mod params;
pub mod runner;
pub mod source;

pub use calibration::{CalibrationData, KernelCalibration};
pub use converter::VirtualConverter;
pub use error::{BuildError, Report, Result};
pub use harvester::{IvCurveSweep, VirtualHarvester};
pub use params::{ConverterParameters, HarvesterParameters};
pub use runner::{RunSummary, StepRecord, TraceSample, replay, replay_parallel};
pub use source::{EnergyAccumulator, SourceModel};
