//! Heading and calibration processor.
//!
//! Turns raw CMPS14 samples into smoothed compass, magnetic and true heading
//! plus levelled attitude, and runs the module's calibration state machine.

use log::{debug, info, warn};

use crate::angle::{ang_diff_deg, wrap360};
use crate::cal_mode::CalMode;
use crate::config::{CAL_OK_REQUIRED, HEADING_ALPHA, RESET_SETTLE_MS};
use crate::error::SensorError;
use crate::harmonic::{DeviationTable, HarmonicCoeffs, compute_harmonic_coeffs};
use crate::sensor::{self, CalQuality, CompassLink, RawSample};
use crate::timing::elapsed_ms;

/// Heading and attitude in degrees. Headings are NaN until the first sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadingState {
    /// Smoothed, offset corrected sensor heading.
    pub compass_deg: f64,
    /// Magnetic heading: compass + deviation.
    pub heading_deg: f64,
    /// True heading: magnetic + variation.
    pub heading_true_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub pitch_level: f64,
    pub roll_level: f64,
}

impl Default for HeadingState {
    fn default() -> Self {
        Self {
            compass_deg: f64::NAN,
            heading_deg: f64::NAN,
            heading_true_deg: f64::NAN,
            pitch_deg: f64::NAN,
            roll_deg: f64::NAN,
            pitch_level: 0.0,
            roll_level: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationState {
    pub mode: CalMode,
    pub cal_ok_count: u8,
    pub profile_stored: bool,
    pub full_auto_start_ms: u32,
    /// FULL AUTO timeout, 0 = never.
    pub full_auto_stop_ms: u32,
    pub full_auto_left_ms: u32,
}

/// Heading and attitude in radians, as published.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadingDelta {
    pub heading_rad: f64,
    pub heading_true_rad: f64,
    pub pitch_rad: f64,
    pub roll_rad: f64,
}

impl Default for HeadingDelta {
    fn default() -> Self {
        Self {
            heading_rad: f64::NAN,
            heading_true_rad: f64::NAN,
            pitch_rad: f64::NAN,
            roll_rad: f64::NAN,
        }
    }
}

/// Attitude extremes in radians since the last `level()`. `None` = unset.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MinMaxDelta {
    pub pitch_min: Option<f64>,
    pub pitch_max: Option<f64>,
    pub roll_min: Option<f64>,
    pub roll_max: Option<f64>,
}

impl MinMaxDelta {
    fn extend(&mut self, pitch: f64, roll: f64) {
        fn lower(slot: &mut Option<f64>, v: f64) {
            *slot = Some(slot.map_or(v, |cur| cur.min(v)));
        }
        fn raise(slot: &mut Option<f64>, v: f64) {
            *slot = Some(slot.map_or(v, |cur| cur.max(v)));
        }
        lower(&mut self.pitch_min, pitch);
        raise(&mut self.pitch_max, pitch);
        lower(&mut self.roll_min, roll);
        raise(&mut self.roll_max, roll);
    }
}

/// The part of the processor a variation feed talks to.
pub trait VariationFeed {
    fn is_sending_heading_true(&self) -> bool;
    fn set_live_variation(&mut self, deg: f64);
    fn set_use_manual_variation(&mut self, manual: bool);
}

pub struct Processor<L: CompassLink> {
    link: L,
    state: HeadingState,
    cal: CalibrationState,
    cal_mode_boot: CalMode,

    installation_offset_deg: f64,
    manual_variation_deg: f64,
    live_variation_deg: f64,
    use_manual_variation: bool,
    send_heading_true: bool,

    measured_deviations_deg: [f64; 8],
    coeffs: HarmonicCoeffs,
    table: DeviationTable,
    deviation_deg: f64,

    // Last raw attitude, captured by level()
    raw_pitch_deg: f64,
    raw_roll_deg: f64,

    heading_delta: HeadingDelta,
    minmax: MinMaxDelta,
}

impl<L: CompassLink> Processor<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            state: HeadingState::default(),
            cal: CalibrationState::default(),
            cal_mode_boot: CalMode::Use,
            installation_offset_deg: 0.0,
            manual_variation_deg: 0.0,
            live_variation_deg: 0.0,
            use_manual_variation: true,
            send_heading_true: true,
            measured_deviations_deg: [0.0; 8],
            coeffs: HarmonicCoeffs::default(),
            table: DeviationTable::new(),
            deviation_deg: 0.0,
            raw_pitch_deg: f64::NAN,
            raw_roll_deg: f64::NAN,
            heading_delta: HeadingDelta::default(),
            minmax: MinMaxDelta::default(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Read the module and process the sample. False if the read failed.
    pub fn update(&mut self) -> bool {
        match self.link.read_sample() {
            Ok(sample) => self.apply_sample(sample),
            Err(e) => {
                debug!("Compass read failed: {}", e);
                false
            }
        }
    }

    /// Process one raw sample. Non-finite input is rejected without touching state.
    pub fn apply_sample(&mut self, sample: RawSample) -> bool {
        let RawSample {
            heading_deg,
            pitch_deg,
            roll_deg,
        } = sample;
        if !(heading_deg.is_finite() && pitch_deg.is_finite() && roll_deg.is_finite()) {
            return false;
        }

        // Compass: offset, then smoothing along the shortest arc
        let raw = wrap360(heading_deg + self.installation_offset_deg);
        self.state.compass_deg = if self.state.compass_deg.is_finite() {
            let diff = ang_diff_deg(raw, self.state.compass_deg);
            wrap360(self.state.compass_deg + HEADING_ALPHA * diff)
        } else {
            raw
        };

        // Magnetic
        self.deviation_deg = self.table.lookup(self.state.compass_deg);
        self.state.heading_deg = wrap360(self.state.compass_deg + self.deviation_deg);

        // True
        self.state.heading_true_deg = wrap360(self.state.heading_deg + self.variation_deg());

        self.raw_pitch_deg = pitch_deg;
        self.raw_roll_deg = roll_deg;
        self.state.pitch_deg = pitch_deg + self.state.pitch_level;
        self.state.roll_deg = roll_deg + self.state.roll_level;

        self.heading_delta = HeadingDelta {
            heading_rad: self.state.heading_deg.to_radians(),
            heading_true_rad: self.state.heading_true_deg.to_radians(),
            pitch_rad: self.state.pitch_deg.to_radians(),
            roll_rad: self.state.roll_deg.to_radians(),
        };
        self.minmax
            .extend(self.heading_delta.pitch_rad, self.heading_delta.roll_rad);

        true
    }

    /// Zero the current attitude and forget the recorded extremes.
    pub fn level(&mut self) {
        if self.raw_pitch_deg.is_finite() && self.raw_roll_deg.is_finite() {
            self.state.pitch_level = -self.raw_pitch_deg;
            self.state.roll_level = -self.raw_roll_deg;
            self.minmax = MinMaxDelta::default();
            info!(
                "Attitude levelled (pitch {:+.1}°, roll {:+.1}°)",
                self.state.pitch_level, self.state.roll_level
            );
        }
    }

    // ** CALIBRATION ** //

    /// Send a command sequence, stopping at the first failure.
    fn send_sequence(&mut self, cmds: &[u8]) -> Result<(), SensorError> {
        cmds.iter().try_for_each(|&cmd| self.link.send_command(cmd))
    }

    /// After a broken sequence, try to leave the module in normal operation.
    fn recover_use_mode(&mut self) {
        if let Err(e) = self.link.send_command(sensor::CMD_USE_MODE) {
            warn!("CMPS14 did not return to use mode: {}", e);
        }
    }

    fn enable_background_cal(&mut self, autosave: bool) -> Result<(), SensorError> {
        let autosave_cmd = if autosave {
            sensor::CMD_AUTOSAVE_ON
        } else {
            sensor::CMD_AUTOSAVE_OFF
        };
        let result = self
            .send_sequence(&sensor::CMD_CAL)
            .and_then(|()| self.link.send_command(autosave_cmd));
        if result.is_err() {
            self.recover_use_mode();
        }
        result
    }

    fn store_profile(&mut self) -> Result<(), SensorError> {
        if let Err(e) = self.send_sequence(&sensor::CMD_SAVE) {
            self.recover_use_mode();
            return Err(e);
        }
        self.link.send_command(sensor::CMD_USE_MODE)?;
        self.cal.profile_stored = true;
        self.cal.mode = CalMode::Use;
        Ok(())
    }

    /// Start `mode`. The runtime mode only changes once the module acknowledged.
    pub fn start_calibration(&mut self, mode: CalMode, now_ms: u32) -> bool {
        let result = match mode {
            CalMode::FullAuto => self.enable_background_cal(true),
            CalMode::Auto | CalMode::Manual => self.enable_background_cal(false),
            CalMode::Use => self.link.send_command(sensor::CMD_USE_MODE),
        };

        match result {
            Ok(()) => {
                self.cal.mode = mode;
                if mode.is_calibrating() {
                    self.cal.profile_stored = false;
                    self.cal.cal_ok_count = 0;
                }
                if mode == CalMode::FullAuto {
                    self.cal.full_auto_left_ms = 0;
                    self.cal.full_auto_start_ms = now_ms;
                }
                info!("Calibration mode {}", mode);
                true
            }
            Err(e) => {
                warn!("Starting calibration mode {} failed: {}", mode, e);
                false
            }
        }
    }

    /// Back to normal operation. The runtime mode is USE even if the command fails.
    pub fn stop_calibration(&mut self) -> bool {
        self.cal.mode = CalMode::Use;
        match self.link.send_command(sensor::CMD_USE_MODE) {
            Ok(()) => true,
            Err(e) => {
                warn!("Stopping calibration failed: {}", e);
                false
            }
        }
    }

    /// Poll calibration quality and, with `autosave`, store the profile after
    /// [`CAL_OK_REQUIRED`] consecutive good polls.
    pub fn monitor_calibration(&mut self, autosave: bool) -> Option<CalQuality> {
        let quality = match self.link.read_register(sensor::REG_CAL_STATUS) {
            Ok(sensor::NACK) => None,
            Ok(byte) => Some(CalQuality::from_status_byte(byte)),
            Err(e) => {
                debug!("Calibration status read failed: {}", e);
                None
            }
        };

        if quality.is_some_and(|q| q.ready_to_save()) {
            self.cal.cal_ok_count = self.cal.cal_ok_count.saturating_add(1);
        } else {
            self.cal.cal_ok_count = 0;
        }

        if autosave && !self.cal.profile_stored && self.cal.cal_ok_count >= CAL_OK_REQUIRED {
            match self.store_profile() {
                Ok(()) => info!("Calibration profile stored"),
                Err(e) => warn!("Storing calibration profile failed: {}", e),
            }
            self.cal.cal_ok_count = 0;
        }

        quality
    }

    /// Operator initiated save for AUTO and MANUAL calibration.
    pub fn save_calibration_profile(&mut self) -> bool {
        match self.store_profile() {
            Ok(()) => {
                info!("Calibration profile stored");
                true
            }
            Err(e) => {
                warn!("Storing calibration profile failed: {}", e);
                false
            }
        }
    }

    /// Factory reset the module and return to USE.
    pub fn reset(&mut self) -> bool {
        let result = self.send_sequence(&sensor::CMD_RESET).and_then(|()| {
            self.link.settle(RESET_SETTLE_MS);
            self.link.send_command(sensor::CMD_USE_MODE)
        });
        match result {
            Ok(()) => {
                self.cal.mode = CalMode::Use;
                self.cal_mode_boot = CalMode::Use;
                self.cal.profile_stored = false;
                self.cal.cal_ok_count = 0;
                info!("CMPS14 reset");
                true
            }
            Err(e) => {
                warn!("CMPS14 reset failed: {}", e);
                false
            }
        }
    }

    /// Enter the persisted boot mode. Falls back to USE when the module is unreachable.
    pub fn init_calibration_mode_boot(&mut self, now_ms: u32) -> bool {
        if !self.link.is_available() {
            self.cal.mode = CalMode::Use;
            return false;
        }
        match self.cal_mode_boot {
            CalMode::Use => self.stop_calibration(),
            mode => self.start_calibration(mode, now_ms),
        }
    }

    /// FULL AUTO countdown. Returns true when the timeout fired and
    /// calibration was stopped.
    pub fn check_full_auto_timeout(&mut self, now_ms: u32) -> bool {
        if self.cal.mode != CalMode::FullAuto || self.cal.full_auto_stop_ms == 0 {
            return false;
        }
        let elapsed = i64::from(elapsed_ms(now_ms, self.cal.full_auto_start_ms).max(0));
        let left = i64::from(self.cal.full_auto_stop_ms) - elapsed;
        if left <= 0 {
            self.cal.full_auto_left_ms = 0;
            self.stop_calibration();
            info!("FULL AUTO calibration timed out");
            true
        } else {
            self.cal.full_auto_left_ms = left as u32;
            false
        }
    }

    // ** GETTERS ** //

    pub fn heading_state(&self) -> HeadingState {
        self.state
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.cal
    }

    pub fn compass_deg(&self) -> f64 {
        self.state.compass_deg
    }

    pub fn heading_deg(&self) -> f64 {
        self.state.heading_deg
    }

    pub fn heading_true_deg(&self) -> f64 {
        self.state.heading_true_deg
    }

    pub fn pitch_deg(&self) -> f64 {
        self.state.pitch_deg
    }

    pub fn roll_deg(&self) -> f64 {
        self.state.roll_deg
    }

    pub fn deviation_deg(&self) -> f64 {
        self.deviation_deg
    }

    /// Variation in effect: manual or live.
    pub fn variation_deg(&self) -> f64 {
        if self.use_manual_variation {
            self.manual_variation_deg
        } else {
            self.live_variation_deg
        }
    }

    pub fn heading_delta(&self) -> HeadingDelta {
        self.heading_delta
    }

    pub fn minmax_delta(&self) -> MinMaxDelta {
        self.minmax
    }

    pub fn cal_mode(&self) -> CalMode {
        self.cal.mode
    }

    pub fn cal_mode_boot(&self) -> CalMode {
        self.cal_mode_boot
    }

    pub fn full_auto_start_ms(&self) -> u32 {
        self.cal.full_auto_start_ms
    }

    pub fn full_auto_timeout_ms(&self) -> u32 {
        self.cal.full_auto_stop_ms
    }

    pub fn full_auto_left_ms(&self) -> u32 {
        self.cal.full_auto_left_ms
    }

    pub fn harmonic_coeffs(&self) -> HarmonicCoeffs {
        self.coeffs
    }

    pub fn measured_deviations(&self) -> [f64; 8] {
        self.measured_deviations_deg
    }

    pub fn installation_offset_deg(&self) -> f64 {
        self.installation_offset_deg
    }

    pub fn manual_variation_deg(&self) -> f64 {
        self.manual_variation_deg
    }

    pub fn live_variation_deg(&self) -> f64 {
        self.live_variation_deg
    }

    pub fn uses_manual_variation(&self) -> bool {
        self.use_manual_variation
    }

    // ** SETTERS ** //

    pub fn set_installation_offset(&mut self, deg: f64) {
        if deg.is_finite() {
            self.installation_offset_deg = deg;
        }
    }

    pub fn set_manual_variation(&mut self, deg: f64) {
        if deg.is_finite() {
            self.manual_variation_deg = deg;
        }
    }

    pub fn set_cal_mode_boot(&mut self, mode: CalMode) {
        self.cal_mode_boot = mode;
    }

    pub fn set_full_auto_timeout(&mut self, ms: u32) {
        self.cal.full_auto_stop_ms = ms;
    }

    pub fn set_send_heading_true(&mut self, enable: bool) {
        self.send_heading_true = enable;
    }

    /// Store new measured deviations, refit the model and rebuild the table.
    pub fn set_measured_deviations(&mut self, deviations_deg: [f64; 8]) -> HarmonicCoeffs {
        self.measured_deviations_deg = deviations_deg;
        let coeffs = compute_harmonic_coeffs(&deviations_deg);
        self.set_harmonic_coeffs(coeffs);
        coeffs
    }

    /// Restore a persisted model: measured deviations and the coefficients
    /// fitted from them earlier. No refit.
    pub fn restore_deviation_model(&mut self, deviations_deg: [f64; 8], coeffs: HarmonicCoeffs) {
        self.measured_deviations_deg = deviations_deg;
        self.set_harmonic_coeffs(coeffs);
    }

    /// Use previously fitted coefficients as they are.
    pub fn set_harmonic_coeffs(&mut self, coeffs: HarmonicCoeffs) {
        self.coeffs = coeffs;
        self.table.build(&coeffs);
        debug!(
            "Deviation model A={:.3} B={:.3} C={:.3} D={:.3} E={:.3}",
            coeffs.a, coeffs.b, coeffs.c, coeffs.d, coeffs.e
        );
    }
}

impl<L: CompassLink> VariationFeed for Processor<L> {
    fn is_sending_heading_true(&self) -> bool {
        self.send_heading_true
    }

    fn set_live_variation(&mut self, deg: f64) {
        if deg.is_finite() {
            self.live_variation_deg = deg;
        }
    }

    fn set_use_manual_variation(&mut self, manual: bool) {
        self.use_manual_variation = manual;
    }
}
