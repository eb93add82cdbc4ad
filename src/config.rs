use serde::{Deserialize, Serialize};

use crate::cal_mode::CalMode;
use crate::harmonic::HarmonicCoeffs;

// ** HEADING CONFIGURATION ** //

/// Exponential smoothing factor applied to every new heading sample.
pub const HEADING_ALPHA: f64 = 0.15;
/// Consecutive fully calibrated polls needed before a profile is stored.
pub const CAL_OK_REQUIRED: u8 = 3;
/// Wait after the factory reset sequence (datasheet asks for 300 ms).
pub const RESET_SETTLE_MS: u64 = 599;

// ** SCHEDULER CONFIGURATION ** //

pub const READ_INTERVAL_MS: u32 = 47;
pub const CAL_POLL_INTERVAL_MS: u32 = 499;
/// Heading, pitch and roll are never published faster than this.
pub const MIN_TX_INTERVAL_MS: u32 = 101;
pub const MINMAX_TX_INTERVAL_MS: u32 = 997;
pub const WS_RETRY_BASE_MS: u32 = 2000;
pub const WS_RETRY_MAX_MS: u32 = 120_000;
pub const WS_CONNECT_TIMEOUT_MS: u64 = 3000;

// ** SIGNALK CONFIGURATION ** //

/// 0.25° deadband for heading and for pitch/roll, in radians.
pub const DEADBAND_HEADING_RAD: f64 = 0.25 * std::f64::consts::PI / 180.0;
pub const DEADBAND_ATTITUDE_RAD: f64 = 0.25 * std::f64::consts::PI / 180.0;
/// Requested cadence of the magnetic variation subscription.
pub const VARIATION_PERIOD_MS: u32 = 1000;
pub const SOURCE_PREFIX: &str = "esp32.cmps14-";

// ** RUNTIME SETTINGS ** //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalKSettings {
    pub host: String,
    pub port: u16,
    /// Access token, omitted from the URL when empty.
    pub token: String,
}

impl Default for SignalKSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3000,
            token: String::new(),
        }
    }
}

/// Everything that survives a restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub signalk: SignalKSettings,
    pub i2c_bus: u8,
    pub i2c_address: u16,
    /// Interface whose MAC address names this device on the server.
    pub network_interface: String,
    pub installation_offset_deg: f64,
    pub manual_variation_deg: f64,
    /// Deviations measured at 0°, 45°, ... 315°.
    pub measured_deviations_deg: [f64; 8],
    pub harmonic_coeffs: Option<HarmonicCoeffs>,
    pub send_heading_true: bool,
    pub cal_mode_boot: CalMode,
    /// 0 means FULL AUTO calibration never times out.
    pub full_auto_timeout_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            signalk: SignalKSettings::default(),
            i2c_bus: 1,
            i2c_address: crate::cmps14::CMPS14_ADDR,
            network_interface: "wlan0".to_string(),
            installation_offset_deg: 0.0,
            manual_variation_deg: 0.0,
            measured_deviations_deg: [0.0; 8],
            harmonic_coeffs: None,
            send_heading_true: true,
            cal_mode_boot: CalMode::Use,
            full_auto_timeout_ms: 0,
        }
    }
}
