use crate::error::SensorError;

// CMPS14 register map
pub const REG_CMD: u8 = 0x00; // Command byte, written before every command
pub const REG_ANGLE_16_H: u8 = 0x02; // 16-bit angle * 10, high byte first
pub const REG_CAL_STATUS: u8 = 0x1E;

// Command bytes
pub const CMD_USE_MODE: u8 = 0x80;
pub const CMD_SAVE: [u8; 3] = [0xF0, 0xF5, 0xF6];
pub const CMD_CAL: [u8; 3] = [0x98, 0x95, 0x99];
pub const CMD_RESET: [u8; 3] = [0xE0, 0xE5, 0xE2];
pub const CMD_AUTOSAVE_ON: u8 = 0x93;
pub const CMD_AUTOSAVE_OFF: u8 = 0x83;

// Replies
pub const ACK_NEW: u8 = 0x55;
pub const ACK_LEGACY: u8 = 0x07; // CMPS12 compatible firmware
pub const NACK: u8 = 0xFF;

/// Highest value of each two-bit calibration quality field.
pub const CAL_QUALITY_MAX: u8 = 3;

pub fn is_ack(byte: u8) -> bool {
    byte == ACK_NEW || byte == ACK_LEGACY
}

/// One reading straight from the module, before any correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawSample {
    pub heading_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

/// Calibration quality of each subsystem, 0 (none) to 3 (fully calibrated).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalQuality {
    pub mag: u8,
    pub acc: u8,
    pub gyr: u8,
    pub sys: u8,
}

impl CalQuality {
    /// Decode the calibration status register: mag in bits 0-1, acc 2-3, gyr 4-5, sys 6-7.
    pub fn from_status_byte(byte: u8) -> Self {
        Self {
            mag: byte & 0x03,
            acc: (byte >> 2) & 0x03,
            gyr: (byte >> 4) & 0x03,
            sys: (byte >> 6) & 0x03,
        }
    }

    /// Ready to store a profile. Gyro quality is not required.
    pub fn ready_to_save(&self) -> bool {
        self.mag == CAL_QUALITY_MAX && self.acc == CAL_QUALITY_MAX && self.sys == CAL_QUALITY_MAX
    }
}

/// Everything the processor needs from the compass hardware.
pub trait CompassLink {
    /// Probe whether the module answers on the bus.
    fn is_available(&mut self) -> bool;

    fn read_sample(&mut self) -> Result<RawSample, SensorError>;

    /// Send one command byte and wait for the ack.
    fn send_command(&mut self, cmd: u8) -> Result<(), SensorError>;

    fn read_register(&mut self, reg: u8) -> Result<u8, SensorError>;

    /// Bounded wait the module needs between some command sequences.
    fn settle(&mut self, ms: u64);
}
