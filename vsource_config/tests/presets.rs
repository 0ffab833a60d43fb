use rstest::rstest;
use vsource_config::{Catalog, ConfigError, HarvesterAlgorithm, IvDataKind, NEUTRAL, PresetKind};

fn catalog() -> Catalog {
    Catalog::builtin().expect("builtin catalog parses")
}

#[rstest]
#[case("neutral")]
#[case("direct")]
#[case("diode_capacitor")]
#[case("diode_resistor_capacitor")]
#[case("bq25504")]
#[case("bq25570")]
fn every_builtin_source_validates(#[case] name: &str) {
    let cat = catalog();
    let cfg = cat.source(name).unwrap();
    assert_eq!(cfg.chain.last().map(String::as_str), Some(NEUTRAL));
    // The harvester a source names must resolve too.
    cat.harvester(&cfg.harvester).unwrap();
}

#[test]
fn every_builtin_harvester_validates() {
    let cat = catalog();
    let names: Vec<String> = cat.names(PresetKind::Harvester).map(str::to_owned).collect();
    assert!(names.len() >= 10);
    for name in names {
        cat.harvester(&name)
            .unwrap_or_else(|e| panic!("harvester {name}: {e:?}"));
    }
}

#[test]
fn child_keys_override_base_keys() {
    let cat = catalog();
    let bq = cat.harvester("mppt_bq").unwrap();
    assert_eq!(bq.chain, ["mppt_bq", "mppt_voc", "neutral"]);
    assert_eq!(bq.algorithm, HarvesterAlgorithm::MpptVoc);
    assert!((bq.setpoint_n - 0.70).abs() < 1e-12);
    assert!((bq.interval_ms - 16_000.0).abs() < 1e-9);
    // inherited from mppt_voc
    assert!((bq.current_limit_ua - 5.0).abs() < 1e-12);
    // inherited from neutral
    assert_eq!(bq.window_size, 16);
}

#[test]
fn buck_source_inherits_boost_stage() {
    let cfg = catalog().source("bq25570").unwrap();
    let boost = cfg.boost.as_ref().expect("boost stage inherited");
    assert!((boost.v_input_boost_threshold_mv - 130.0).abs() < 1e-12);
    assert!(cfg.buck.is_some());
    assert!((cfg.v_output_mv - 2000.0).abs() < 1e-12);
}

#[test]
fn inheritance_cycle_is_detected() {
    let text = r#"
[harvesters.a]
base = "b"
algorithm = "cv"

[harvesters.b]
base = "a"
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.resolve(PresetKind::Harvester, "a").unwrap_err();
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::InheritanceCycle { name, chain }) => {
            assert_eq!(name, "a");
            assert_eq!(chain, "a -> b");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn self_reference_is_a_cycle() {
    let text = r#"
[sources.loop]
base = "loop"
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.resolve(PresetKind::Source, "loop").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InheritanceCycle { .. })
    ));
}

#[rstest]
#[case(PresetKind::Harvester, "does_not_exist")]
#[case(PresetKind::Source, "does_not_exist")]
fn unknown_preset_is_reported(#[case] kind: PresetKind, #[case] name: &str) {
    let err = catalog().resolve(kind, name).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnknownPreset { .. })
    ));
}

#[test]
fn unknown_base_is_reported() {
    let text = r#"
[harvesters.orphan]
base = "missing"
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.harvester("orphan").unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn out_of_range_values_are_clamped() {
    let text = r#"
[harvesters.wide]
base = "cv"
window_size = 5
voltage_max_mv = 9000
setpoint_n = 3.0
duration_ms = 500
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let h = cat.harvester("wide").unwrap();
    assert_eq!(h.window_size, 16);
    assert!((h.voltage_max_mv - 5000.0).abs() < 1e-12);
    assert!((h.setpoint_n - 1.0).abs() < 1e-12);
    // duration may not exceed the interval (100 ms from neutral)
    assert!((h.duration_ms - h.interval_ms).abs() < 1e-12);
}

#[test]
fn default_voltage_step_spans_window() {
    let h = catalog().harvester("ivcurve").unwrap();
    assert_eq!(h.dtype, IvDataKind::IvCurve);
    assert!((h.voltage_step_mv - 20.0).abs() < 1e-12);
    assert_eq!(h.window_samples(), 500);
}

#[test]
fn negative_value_is_rejected() {
    let text = r#"
[sources.bad]
v_output_mv = -1
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.source("bad").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::NotPositive {
            key: "v_output_mv",
            ..
        })
    ));
}

#[test]
fn boost_without_storage_is_a_mode_conflict() {
    let text = r#"
[sources.bad_boost]
base = "bq25504"
enable_storage = false
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.source("bad_boost").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ModeConflict(_))
    ));
}

#[test]
fn buck_without_output_lut_is_missing_field() {
    let text = r#"
[sources.half_buck]
base = "bq25504"
enable_buck = true
lut_output_i_min_log2_na = 5
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.source("half_buck").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingField {
            field: "lut_output_efficiency",
            required_by: "enable_buck",
        })
    ));
}

#[test]
fn lut_shape_is_checked() {
    let text = r#"
[sources.short_lut]
base = "bq25570"
lut_output_efficiency = [0.5, 0.5]
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    let err = cat.source("short_lut").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::LutShape { .. })
    ));
}

#[test]
fn storage_without_capacitance_is_rejected() {
    let text = r#"
[sources.no_cap]
enable_storage = true
"#;
    let mut cat = catalog();
    cat.merge(Catalog::from_toml_str(text).unwrap());
    assert!(cat.source("no_cap").is_err());
}

#[test]
fn user_catalog_file_is_layered_over_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("presets.toml");
    std::fs::write(
        &path,
        r#"
[sources.my_cap]
base = "diode_capacitor"
c_intermediate_uf = 47
"#,
    )
    .unwrap();
    let cat = Catalog::load_file(&path).unwrap();
    let cfg = cat.source("my_cap").unwrap();
    assert!((cfg.c_intermediate_uf - 47.0).abs() < 1e-12);
    assert!(cfg.enable_storage);
    assert!(cat.get(PresetKind::Source, "bq25504").is_some());
}
