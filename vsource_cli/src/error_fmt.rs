//! Human-readable error descriptions and structured JSON error formatting.

use vsource_config::ConfigError;
use vsource_core::BuildError;

/// Exit code for configuration problems in presets or calibration files.
pub const EXIT_CONFIG: i32 = 3;
/// Exit code when valid presets cannot be turned into a model.
pub const EXIT_BUILD: i32 = 4;

fn find_config_error(err: &eyre::Report) -> Option<&ConfigError> {
    err.chain().find_map(|e| e.downcast_ref::<ConfigError>())
}

fn find_build_error(err: &eyre::Report) -> Option<&BuildError> {
    err.chain().find_map(|e| e.downcast_ref::<BuildError>())
}

/// Map an `eyre::Report` to a human-readable explanation with a fix hint.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = find_config_error(err) {
        let hint = match ce {
            ConfigError::UnknownPreset { .. } => {
                "Check the name against the builtin catalog or the file passed with --catalog."
            }
            ConfigError::InheritanceCycle { .. } | ConfigError::InvalidBase { .. } => {
                "Fix the 'base' entries so every chain ends at 'neutral'."
            }
            ConfigError::MissingField { .. } | ConfigError::ModeConflict(_) => {
                "Add the fields the enabled converter stages need, or disable the stage."
            }
            ConfigError::LutShape { .. } => {
                "Input efficiency tables are 12 rows of 12 values, output tables 12 values."
            }
            ConfigError::NotPositive { .. } | ConfigError::Invalid { .. } => {
                "Edit the preset values and try again."
            }
        };
        return format!("What happened: {ce}.\nHow to fix: {hint}");
    }

    if let Some(be) = find_build_error(err) {
        let hint = match be {
            BuildError::EmulationAlgorithm { .. } => {
                "Pick a source whose harvester tracks a point (cv, mppt_voc, mppt_po, mppt_opt)."
            }
            BuildError::HarvestAlgorithm { .. } => {
                "Pick a harvester with algorithm ivcurve, cv, mppt_voc, mppt_po or mppt_opt."
            }
            BuildError::IscVocReplay => "Record IV curves or operating points instead.",
            BuildError::ZeroGain { .. } | BuildError::KernelOverflow { .. } => {
                "Re-run fit-calibration or fix the gain/offset in the calibration file."
            }
            BuildError::InvalidConfig(_) => "Check the sample rate and converter settings.",
        };
        return format!("What happened: {be}.\nHow to fix: {hint}");
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("measurement csv must have headers") {
        return "Invalid headers in measurement CSV. Expected 'component,channel,reference_si,raw'."
            .to_string();
    }

    let cause = err
        .chain()
        .nth(1)
        .map(|src| format!(" Cause: {src}"))
        .unwrap_or_default();
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Typed configuration errors map to stable exit codes; everything else is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if find_config_error(err).is_some() {
        EXIT_CONFIG
    } else if find_build_error(err).is_some() {
        EXIT_BUILD
    } else {
        1
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if find_config_error(err).is_some() {
        "ConfigError"
    } else if find_build_error(err).is_some() {
        "BuildError"
    } else {
        "Error"
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
        "chain": err.chain().map(ToString::to_string).collect::<Vec<_>>(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn typed_errors_survive_context() {
        let err: eyre::Report = Err::<(), _>(eyre::Report::new(ConfigError::UnknownPreset {
            kind: "source",
            name: "nope".into(),
        }))
        .wrap_err("load catalog")
        .unwrap_err();
        assert_eq!(exit_code_for_error(&err), EXIT_CONFIG);
        assert!(humanize(&err).contains("unknown source preset 'nope'"));
    }

    #[test]
    fn build_errors_get_their_own_code() {
        let err = eyre::Report::new(BuildError::IscVocReplay);
        assert_eq!(exit_code_for_error(&err), EXIT_BUILD);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "BuildError");
        assert_eq!(v["exit_code"], 4);
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("disk on fire");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: disk on fire"));
    }
}
