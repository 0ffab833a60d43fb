//! Harvesting stage: picks the operating point on a replayed IV curve.
//!
//! In emulation the input stream is a sequence of IV curves, `window_size`
//! samples each. The algorithms below look at one sample at a time and return
//! the (voltage, current) pair the harvesting front end would have settled on.

use std::sync::Arc;

use vsource_config::HarvesterAlgorithm;

use crate::params::HarvesterParameters;

/// Perturb-and-observe step ceiling.
const PO_STEP_MAX_UV: u32 = 300_000;
/// Interval counter start; the first sample opens an interval.
const INTERVAL_STEP_START: u32 = 1 << 30;

#[derive(Debug, Clone, Default)]
struct CvState {
    voltage_last: u32,
    current_last: u32,
    compare_last: bool,
    voltage_hold: u32,
    current_hold: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PowerPoint {
    age: u32,
    power_fw: u64,
    voltage_uv: u32,
    current_na: u32,
}

#[derive(Debug, Clone)]
struct HarvesterState {
    voltage_set_uv: u32,
    is_rising: bool,
    voltage_step_x4_uv: u32,
    age_max: u32,
    interval_step: u32,
    cv: CvState,
    // open-circuit voltage tracking
    voc_age_now: u32,
    voc_now: u32,
    voc_age_nxt: u32,
    voc_nxt: u32,
    // perturb and observe
    po_power_last: u64,
    po_step_uv: u32,
    // optimum tracking
    opt_now: PowerPoint,
    opt_nxt: PowerPoint,
}

#[derive(Debug, Clone)]
pub struct VirtualHarvester {
    cfg: Arc<HarvesterParameters>,
    state: HarvesterState,
}

impl VirtualHarvester {
    pub fn new(cfg: Arc<HarvesterParameters>) -> Self {
        let state = HarvesterState {
            voltage_set_uv: cfg.voltage_uv,
            is_rising: cfg.is_rising(),
            voltage_step_x4_uv: cfg.voltage_step_uv.saturating_mul(4),
            age_max: cfg.window_size.saturating_mul(2),
            interval_step: INTERVAL_STEP_START,
            cv: CvState::default(),
            voc_age_now: 0,
            voc_now: cfg.voltage_max_uv,
            voc_age_nxt: 0,
            voc_nxt: cfg.voltage_max_uv,
            po_power_last: 0,
            po_step_uv: cfg.voltage_step_uv,
            opt_now: PowerPoint::default(),
            opt_nxt: PowerPoint::default(),
        };
        Self { cfg, state }
    }

    pub fn params(&self) -> &HarvesterParameters {
        &self.cfg
    }

    /// Current set point of the CV stage, in µV.
    pub fn voltage_set_uv(&self) -> u32 {
        self.state.voltage_set_uv
    }

    /// Operating point selected for this input sample.
    pub fn iv_sample(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        if self.cfg.window_size <= 1 {
            return (voltage_uv, current_na);
        }
        match self.cfg.algorithm {
            HarvesterAlgorithm::Cv => self.iv_cv(voltage_uv, current_na),
            HarvesterAlgorithm::MpptVoc => self.iv_mppt_voc(voltage_uv, current_na),
            HarvesterAlgorithm::MpptPo => self.iv_mppt_po(voltage_uv, current_na),
            HarvesterAlgorithm::MpptOpt => self.iv_mppt_opt(voltage_uv, current_na),
            HarvesterAlgorithm::Neutral
            | HarvesterAlgorithm::IscVoc
            | HarvesterAlgorithm::IvCurve => (voltage_uv, current_na),
        }
    }

    /// Hold the sample closest to the set point, updated whenever the curve
    /// crosses it.
    fn iv_cv(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let st = &mut self.state;
        let x4 = st.voltage_step_x4_uv;
        let cv = &mut st.cv;

        let compare_now = voltage_uv < st.voltage_set_uv;
        let step_size_now = voltage_uv.abs_diff(cv.voltage_last);
        let distance_now = voltage_uv.abs_diff(st.voltage_set_uv);
        let distance_last = cv.voltage_last.abs_diff(st.voltage_set_uv);

        if compare_now != cv.compare_last && step_size_now < x4 {
            if distance_now < distance_last && distance_now < x4 {
                cv.voltage_hold = voltage_uv;
                cv.current_hold = current_na;
            } else if distance_last < distance_now && distance_last < x4 {
                cv.voltage_hold = cv.voltage_last;
                cv.current_hold = cv.current_last;
            }
        }
        cv.voltage_last = voltage_uv;
        cv.current_last = current_na;
        cv.compare_last = compare_now;
        (cv.voltage_hold, cv.current_hold)
    }

    fn next_interval_step(&mut self) -> u32 {
        let st = &mut self.state;
        st.interval_step = if st.interval_step >= self.cfg.interval_n {
            0
        } else {
            st.interval_step + 1
        };
        st.interval_step
    }

    /// Fractional open-circuit voltage: CV at `setpoint * voc`, with the load
    /// disconnected for the first `duration_n` samples of every interval.
    fn iv_mppt_voc(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let interval_step = self.next_interval_step();
        let cfg = &*self.cfg;
        let st = &mut self.state;

        st.voc_age_nxt = st.voc_age_nxt.saturating_add(1);
        st.voc_age_now = st.voc_age_now.saturating_add(1);
        if current_na < cfg.current_limit_na
            && voltage_uv <= st.voc_nxt
            && (cfg.voltage_min_uv..=cfg.voltage_max_uv).contains(&voltage_uv)
        {
            st.voc_nxt = voltage_uv;
            st.voc_age_nxt = 0;
        }
        // the tracked VOC ages out after two windows or when a better one shows up
        if st.voc_age_now > st.age_max || st.voc_nxt <= st.voc_now {
            st.voc_age_now = st.voc_age_nxt;
            st.voc_now = st.voc_nxt;
            st.voc_age_nxt = 0;
            st.voc_nxt = cfg.voltage_max_uv;
        }

        let (v, mut i) = self.iv_cv(voltage_uv, current_na);
        let cfg = &*self.cfg;
        let st = &mut self.state;
        if interval_step < cfg.duration_n {
            i = 0;
        }
        if interval_step == 0 {
            let set = (u64::from(st.voc_now) * u64::from(cfg.setpoint_n8)) >> 8;
            st.voltage_set_uv = u32::try_from(set)
                .unwrap_or(u32::MAX)
                .clamp(cfg.voltage_min_uv, cfg.voltage_max_uv.max(cfg.voltage_min_uv));
        }
        (v, i)
    }

    /// Perturb and observe on top of the CV stage.
    fn iv_mppt_po(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let interval_step = self.next_interval_step();
        let (v, i) = self.iv_cv(voltage_uv, current_na);
        if interval_step != 0 {
            return (v, i);
        }

        let cfg = &*self.cfg;
        let st = &mut self.state;
        let power_now = u64::from(v) * u64::from(i);
        if power_now > st.po_power_last {
            st.voltage_set_uv = shift_setpoint(st.voltage_set_uv, st.po_step_uv, st.is_rising);
            st.po_step_uv = st.po_step_uv.saturating_mul(2).min(PO_STEP_MAX_UV);
        } else {
            st.is_rising = !st.is_rising;
            st.po_step_uv = cfg.voltage_step_uv;
            st.voltage_set_uv = shift_setpoint(st.voltage_set_uv, st.po_step_uv, st.is_rising);
        }
        st.po_power_last = power_now;

        if st.voltage_set_uv > cfg.voltage_max_uv {
            st.voltage_set_uv = cfg.voltage_max_uv;
            st.is_rising = false;
        }
        if st.voltage_set_uv < cfg.voltage_min_uv {
            st.voltage_set_uv = cfg.voltage_min_uv;
            st.is_rising = true;
        }
        tracing::trace!(
            set_uv = st.voltage_set_uv,
            power_fw = power_now,
            rising = st.is_rising,
            "po step"
        );
        (v, i)
    }

    /// Emit the highest-power point seen within the last window.
    fn iv_mppt_opt(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let cfg = &*self.cfg;
        let st = &mut self.state;

        st.opt_nxt.age = st.opt_nxt.age.saturating_add(1);
        st.opt_now.age = st.opt_now.age.saturating_add(1);

        let power_fw = u64::from(voltage_uv) * u64::from(current_na);
        if power_fw >= st.opt_nxt.power_fw
            && (cfg.voltage_min_uv..=cfg.voltage_max_uv).contains(&voltage_uv)
        {
            st.opt_nxt = PowerPoint {
                age: 0,
                power_fw,
                voltage_uv,
                current_na,
            };
        }
        if st.opt_now.age > st.age_max || st.opt_nxt.power_fw >= st.opt_now.power_fw {
            st.opt_now = st.opt_nxt;
            st.opt_nxt = PowerPoint::default();
        }
        (st.opt_now.voltage_uv, st.opt_now.current_na)
    }
}

#[inline]
const fn shift_setpoint(set_uv: u32, step_uv: u32, rising: bool) -> u32 {
    if rising {
        set_uv.saturating_add(step_uv)
    } else {
        set_uv.saturating_sub(step_uv)
    }
}

/// DAC set points of a recording sweep, one item per sample.
///
/// Each of the `window_size` voltage steps is held for `1 + wait_cycles`
/// samples; after the last step the sweep starts over.
#[derive(Debug, Clone)]
pub struct IvCurveSweep {
    start_uv: u32,
    min_uv: u32,
    max_uv: u32,
    step_uv: u32,
    rising: bool,
    steps: u32,
    hold: u32,
    position: u64,
}

impl IvCurveSweep {
    pub fn new(cfg: &HarvesterParameters) -> Self {
        let rising = cfg.is_rising();
        Self {
            start_uv: if rising {
                cfg.voltage_min_uv
            } else {
                cfg.voltage_max_uv
            },
            min_uv: cfg.voltage_min_uv,
            max_uv: cfg.voltage_max_uv.max(cfg.voltage_min_uv),
            step_uv: cfg.voltage_step_uv,
            rising,
            steps: cfg.window_size.max(1),
            hold: cfg.wait_cycles_n.saturating_add(1),
            position: 0,
        }
    }

    /// Samples in one full sweep.
    pub fn sweep_len(&self) -> u64 {
        u64::from(self.steps) * u64::from(self.hold)
    }
}

impl Iterator for IvCurveSweep {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let in_sweep = self.position % self.sweep_len();
        self.position = self.position.wrapping_add(1);
        let step = u32::try_from(in_sweep / u64::from(self.hold)).unwrap_or(u32::MAX);
        let offset = step.saturating_mul(self.step_uv);
        let voltage = if self.rising {
            self.start_uv.saturating_add(offset)
        } else {
            self.start_uv.saturating_sub(offset)
        };
        Some(voltage.clamp(self.min_uv, self.max_uv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(algorithm: HarvesterAlgorithm) -> HarvesterParameters {
        HarvesterParameters {
            algorithm,
            hrv_mode: crate::params::HRV_MODE_EMULATION,
            window_size: 8,
            voltage_uv: 1_000_000,
            voltage_min_uv: 0,
            voltage_max_uv: 5_000_000,
            voltage_step_uv: 100_000,
            current_limit_na: 10,
            setpoint_n8: 128,
            interval_n: 100,
            duration_n: 1,
            wait_cycles_n: 0,
        }
    }

    #[test]
    fn small_window_passes_through() {
        let mut p = params(HarvesterAlgorithm::Cv);
        p.window_size = 1;
        let mut h = VirtualHarvester::new(Arc::new(p));
        assert_eq!(h.iv_sample(1234, 5678), (1234, 5678));
    }

    #[test]
    fn sweep_repeats_and_holds() {
        let mut p = params(HarvesterAlgorithm::IvCurve);
        p.hrv_mode = crate::params::HRV_MODE_RISING;
        p.window_size = 3;
        p.wait_cycles_n = 1;
        let sweep = IvCurveSweep::new(&p);
        assert_eq!(sweep.sweep_len(), 6);
        let v: Vec<u32> = sweep.take(8).collect();
        assert_eq!(v, [0, 0, 100_000, 100_000, 200_000, 200_000, 0, 0]);
    }

    #[test]
    fn falling_sweep_starts_at_max() {
        let mut p = params(HarvesterAlgorithm::IvCurve);
        p.hrv_mode = 0;
        p.window_size = 2;
        let v: Vec<u32> = IvCurveSweep::new(&p).take(3).collect();
        assert_eq!(v, [5_000_000, 4_900_000, 5_000_000]);
    }
}
