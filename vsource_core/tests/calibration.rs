use proptest::prelude::*;
use rstest::rstest;
use vsource_config::{CalPair, CalibrationFile, Channel, Component};
use vsource_core::CalibrationData;

proptest! {
    #[test]
    fn dac_code_round_trips(raw in 0u32..65_536) {
        let cal = CalibrationData::default();
        let v = cal.dac_raw_to_uv(raw);
        prop_assert_eq!(cal.uv_to_dac_raw(v), raw);
    }

    #[test]
    fn adc_code_round_trips(raw in 0u32..262_144) {
        let cal = CalibrationData::default();
        let i = cal.adc_raw_to_na(raw);
        prop_assert_eq!(cal.na_to_adc_raw(i), raw);
    }

    #[test]
    fn value_to_raw_is_monotonic(a in -1.0f64..6.0, b in -1.0f64..6.0) {
        let cal = CalibrationData::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            cal.value_to_raw(Component::Emulator, Channel::DacVoltageB, lo)
                <= cal.value_to_raw(Component::Emulator, Channel::DacVoltageB, hi)
        );
    }
}

#[rstest]
#[case(Channel::DacVoltageA, 65_535)]
#[case(Channel::DacVoltageB, 65_535)]
#[case(Channel::AdcCurrent, 262_143)]
#[case(Channel::AdcVoltage, 262_143)]
fn value_to_raw_clamps_to_resolution(#[case] channel: Channel, #[case] max: u32) {
    let cal = CalibrationData::default();
    assert_eq!(cal.value_to_raw(Component::Harvester, channel, 1e6), max);
    assert_eq!(cal.value_to_raw(Component::Harvester, channel, -1.0), 0);
    assert_eq!(cal.value_to_raw(Component::Harvester, channel, f64::NAN), 0);
}

#[rstest]
#[case(0, 0.0)]
#[case(131_072, 2_560_000.0)]
#[case(262_143, 5_119_980.468_75)]
fn emulator_adc_voltage_in_microvolts(#[case] raw: u32, #[case] expected_uv: f64) {
    let uv = CalibrationData::default().adc_raw_to_uv(raw);
    assert!((uv - expected_uv).abs() < 1e-3, "{uv}");
}

#[test]
fn file_overlays_analytic_default() {
    let mut file = CalibrationFile::default();
    file.emulator.set(
        Channel::AdcCurrent,
        CalPair {
            gain: 2e-7,
            offset: 1e-6,
        },
    );
    let cal = CalibrationData::try_from(&file).unwrap();
    let cur = cal.pair(Component::Emulator, Channel::AdcCurrent);
    assert_eq!(cur.gain, 2e-7);
    assert_eq!(cur.offset, 1e-6);
    // untouched channels keep the front-end model
    assert_eq!(
        cal.pair(Component::Emulator, Channel::DacVoltageB),
        CalibrationData::default().pair(Component::Emulator, Channel::DacVoltageB)
    );
    // currents below the offset clamp to code 0
    assert_eq!(cal.na_to_adc_raw(500.0), 0);
}

#[test]
fn file_with_zero_gain_is_rejected() {
    let mut file = CalibrationFile::default();
    file.harvester.set(
        Channel::DacVoltageA,
        CalPair {
            gain: 0.0,
            offset: 0.0,
        },
    );
    let err = CalibrationData::try_from(&file).unwrap_err();
    assert!(format!("{err}").contains("harvester.dac_voltage_a"));
}

#[test]
fn to_file_round_trips() {
    let cal = CalibrationData::default();
    let back = CalibrationData::from_file(&cal.to_file()).unwrap();
    assert_eq!(back, cal);
}
