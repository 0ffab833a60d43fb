use thiserror::Error;

/// Static configuration problems. Raised while loading or resolving presets,
/// never while a simulation is running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown {kind} preset '{name}'")]
    UnknownPreset { kind: &'static str, name: String },
    #[error("loop detected in base inheritance at '{name}' (chain: {chain})")]
    InheritanceCycle { name: String, chain: String },
    #[error("'base' of preset '{preset}' must be a preset name")]
    InvalidBase { preset: String },
    #[error("{key} must be a single positive number, but is {value}")]
    NotPositive { key: &'static str, value: f64 },
    #[error("missing field {field} (required by {required_by})")]
    MissingField {
        field: &'static str,
        required_by: &'static str,
    },
    #[error("{lut} must be a {expected} table, got {actual}")]
    LutShape {
        lut: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("invalid {kind} preset '{name}': {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("inconsistent converter modes: {0}")]
    ModeConflict(&'static str),
}
