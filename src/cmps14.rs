use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rppal::i2c::I2c;

use crate::error::SensorError;
use crate::sensor::{self, CompassLink, RawSample};

pub const CMPS14_ADDR: u16 = 0x60;

/// Datasheet asks for 20 ms between writing a command and reading the ack.
const COMMAND_SETTLE_MS: u64 = 23;

/// CMPS14 tilt compensated compass on a Linux I2C bus.
pub struct Cmps14 {
    i2c: I2c,
}

impl Cmps14 {
    /// Open the bus. Fails only if the bus itself cannot be set up; a module
    /// that does not answer yet is reported and left to the caller.
    pub fn new(bus: u8, addr: u16) -> Result<Self, SensorError> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(addr)?;

        let mut compass = Self { i2c };
        if compass.is_available() {
            info!("CMPS14 INIT OK at 0x{:02X} on bus {}", addr, bus);
        } else {
            warn!("CMPS14 INIT FAILED: nothing answers at 0x{:02X} on bus {}", addr, bus);
        }
        Ok(compass)
    }
}

impl CompassLink for Cmps14 {
    fn is_available(&mut self) -> bool {
        // Any register read succeeding means the module ACKed its address
        self.i2c.smbus_read_byte(sensor::REG_CMD).is_ok()
    }

    fn read_sample(&mut self) -> Result<RawSample, SensorError> {
        // Angle hi/lo, pitch, roll are consecutive registers
        let mut data = [0u8; 4];
        self.i2c.write_read(&[sensor::REG_ANGLE_16_H], &mut data)?;

        let tenths = u16::from_be_bytes([data[0], data[1]]);
        Ok(RawSample {
            heading_deg: f64::from(tenths) / 10.0,
            pitch_deg: f64::from(data[2] as i8),
            roll_deg: f64::from(data[3] as i8),
        })
    }

    fn send_command(&mut self, cmd: u8) -> Result<(), SensorError> {
        self.i2c.write(&[sensor::REG_CMD, cmd])?;
        thread::sleep(Duration::from_millis(COMMAND_SETTLE_MS));

        let mut reply = [0u8; 1];
        let got = self.i2c.read(&mut reply)?;
        if got != 1 {
            return Err(SensorError::ShortRead {
                got,
                expected: 1,
            });
        }
        if !sensor::is_ack(reply[0]) {
            debug!("CMPS14 command 0x{:02X} answered 0x{:02X}", cmd, reply[0]);
            return Err(SensorError::Nack(cmd, reply[0]));
        }
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, SensorError> {
        Ok(self.i2c.smbus_read_byte(reg)?)
    }

    fn settle(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
