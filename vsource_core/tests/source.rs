//! End-to-end behavior of the per-sample pipeline.

use std::sync::Arc;

use vsource_config::{Catalog, EmulationInput};
use vsource_core::{CalibrationData, SourceModel};

fn flat_lut_row(eta: f64) -> String {
    format!("[{}]", vec![format!("{eta:.2}"); 12].join(", "))
}

/// Boost charger with a buck regulating 3.3 V, flat 90 % efficiency.
fn regulated_catalog() -> Catalog {
    let rows = vec![flat_lut_row(0.9); 12].join(",\n    ");
    let extra = format!(
        r#"
[sources.regulated]
enable_storage = true
enable_boost = true
enable_buck = true
c_intermediate_uf = 10
v_intermediate_init_mv = 3500
v_intermediate_max_mv = 4200
v_output_mv = 3300
v_buck_drop_mv = 100
v_enable_output_threshold_mv = 3000
v_disable_output_threshold_mv = 2500
v_input_boost_threshold_mv = 100
lut_input_v_min_log2_uv = 19
lut_input_i_min_log2_na = 5
lut_input_efficiency = [
    {rows},
]
lut_output_i_min_log2_na = 5
lut_output_efficiency = {out}
"#,
        out = flat_lut_row(0.9),
    );
    let mut catalog = Catalog::builtin().unwrap();
    catalog.merge(Catalog::from_toml_str(&extra).unwrap());
    catalog
}

fn model(catalog: &Catalog, source: &str) -> SourceModel {
    SourceModel::from_catalog(
        catalog,
        source,
        Arc::new(CalibrationData::default()),
        &EmulationInput::operating_points(),
    )
    .unwrap()
}

#[test]
fn boost_buck_regulates_output() {
    let catalog = regulated_catalog();
    let mut m = model(&catalog, "regulated");

    let mut v_mid_tail = Vec::new();
    let mut v_out = 0;
    for n in 0..10_000 {
        v_out = m.step(3_000_000, 2_000_000, 1_000_000);
        if n >= 9_000 {
            v_mid_tail.push(m.converter().v_intermediate_uv());
        }
    }
    // net positive balance charges the storage up to its limit and holds it
    assert!(v_mid_tail.iter().all(|&v| v == 4_200_000));
    assert!(v_out.abs_diff(3_300_000) <= 77, "{v_out}");
    assert_eq!(m.converter().v_out_dac_raw(), 43_254);
    assert!(m.converter().is_outputting());
    assert!(m.converter().power_good());
}

#[test]
fn regulated_output_skips_pass_through_above_target() {
    let catalog = regulated_catalog();
    let mut m = model(&catalog, "regulated");
    // V_mid 3.5 V is above 3.3 V + 0.1 V: regulated from the first sample
    let v_out = m.step(0, 0, 0);
    assert_eq!(v_out, 3_300_018);
}

#[test]
fn direct_source_tracks_input() {
    let catalog = Catalog::builtin().unwrap();
    let mut m = model(&catalog, "direct");
    let v_out = m.step(2_000_000, 1_000, 0);
    assert_eq!(m.converter().v_intermediate_uv(), 2_000_000);
    assert_eq!(m.converter().p_input_fw(), 0);
    assert!(v_out.abs_diff(2_000_000) <= 77, "{v_out}");
}

#[test]
fn accumulator_sums_raw_power() {
    let catalog = Catalog::builtin().unwrap();
    let mut m = model(&catalog, "direct").with_accumulator();
    for _ in 0..100 {
        m.step(2_000_000, 1_000, 0);
    }
    let acc = m.accumulator().unwrap();
    assert_eq!(acc.samples(), 100);
    // 2 V * 1 uA for 1 ms
    let e = acc.harvested_energy_j(m.samplerate_sps());
    assert!((e - 2e-9).abs() < 1e-15, "{e}");
    assert_eq!(acc.delivered_energy_j(m.samplerate_sps()), 0.0);
}

#[test]
fn accumulator_is_off_by_default() {
    let catalog = Catalog::builtin().unwrap();
    let mut m = model(&catalog, "direct");
    m.step(2_000_000, 1_000, 0);
    assert!(m.accumulator().is_none());
}

#[test]
fn harvester_stage_runs_on_ivcurve_input() {
    let mut catalog = Catalog::builtin().unwrap();
    catalog.merge(
        Catalog::from_toml_str(
            r#"
[sources.direct_cv]
base = "direct"
harvester = "cv20"
"#,
        )
        .unwrap(),
    );
    let mut m = SourceModel::from_catalog(
        &catalog,
        "direct_cv",
        Arc::new(CalibrationData::default()),
        &EmulationInput::ivcurve(32),
    )
    .unwrap();
    assert_eq!(m.harvester().params().window_size, 32);

    // falling curve through the 2 V set point in 100 mV steps
    for k in 0..32u32 {
        m.step(3_000_000u32.saturating_sub(k * 100_000), k * 10, 0);
    }
    assert_eq!(m.converter().v_intermediate_uv(), 2_000_000);
}

#[test]
fn unknown_source_is_an_error() {
    let catalog = Catalog::builtin().unwrap();
    let res = SourceModel::from_catalog(
        &catalog,
        "nope",
        Arc::new(CalibrationData::default()),
        &EmulationInput::operating_points(),
    );
    assert!(res.is_err());
}

#[test]
fn converter_hooks_reachable_through_model() {
    let catalog = Catalog::builtin().unwrap();
    let mut m = model(&catalog, "diode_capacitor");
    m.converter_mut().set_v_intermediate_uv(4_000_000);
    assert_eq!(m.converter().v_intermediate_uv(), 4_000_000);
}
