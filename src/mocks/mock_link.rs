// This file is only compiled during tests

use std::collections::VecDeque;

use crate::error::SensorError;
use crate::sensor::{CompassLink, RawSample};

/// Scripted stand-in for the CMPS14.
pub struct MockLink {
    pub available: bool,
    /// Returned by `read_sample`; `None` simulates a bus failure.
    pub sample: Option<RawSample>,
    /// Every command byte written, acked or not.
    pub sent: Vec<u8>,
    /// Commands answered with a NACK.
    pub nack: Vec<u8>,
    /// Status bytes handed out by successive calibration status reads.
    pub status_bytes: VecDeque<u8>,
    /// Returned once `status_bytes` runs dry.
    pub status_default: Option<u8>,
    pub settled_ms: u64,
}

impl Default for MockLink {
    fn default() -> Self {
        Self {
            available: true,
            sample: None,
            sent: Vec::new(),
            nack: Vec::new(),
            status_bytes: VecDeque::new(),
            status_default: Some(0),
            settled_ms: 0,
        }
    }
}

impl MockLink {
    pub fn with_sample(heading_deg: f64, pitch_deg: f64, roll_deg: f64) -> Self {
        Self {
            sample: Some(RawSample {
                heading_deg,
                pitch_deg,
                roll_deg,
            }),
            ..Default::default()
        }
    }

    pub fn set_sample(&mut self, heading_deg: f64, pitch_deg: f64, roll_deg: f64) {
        self.sample = Some(RawSample {
            heading_deg,
            pitch_deg,
            roll_deg,
        });
    }
}

impl CompassLink for MockLink {
    fn is_available(&mut self) -> bool {
        self.available
    }

    fn read_sample(&mut self) -> Result<RawSample, SensorError> {
        self.sample.ok_or(SensorError::Unavailable)
    }

    fn send_command(&mut self, cmd: u8) -> Result<(), SensorError> {
        self.sent.push(cmd);
        if !self.available {
            return Err(SensorError::Unavailable);
        }
        if self.nack.contains(&cmd) {
            return Err(SensorError::Nack(cmd, crate::sensor::NACK));
        }
        Ok(())
    }

    fn read_register(&mut self, _reg: u8) -> Result<u8, SensorError> {
        self.status_bytes
            .pop_front()
            .or(self.status_default)
            .ok_or(SensorError::Unavailable)
    }

    fn settle(&mut self, ms: u64) {
        self.settled_ms += ms;
    }
}
