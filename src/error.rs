use std::io;

/// Failures talking to the compass module.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("I2C error: {0}")]
    I2c(#[from] rppal::i2c::Error),

    #[error("short read: got {got} of {expected} bytes")]
    ShortRead { got: usize, expected: usize },

    #[error("command 0x{0:02X} not acknowledged (reply 0x{1:02X})")]
    Nack(u8, u8),

    #[error("sensor not responding")]
    Unavailable,
}

/// Failures on the SignalK websocket.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no SignalK server configured")]
    NotConfigured,

    #[error("websocket not open")]
    NotOpen,

    #[error("connect to {0} failed: {1}")]
    ConnectFailed(String, String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures loading or saving persisted settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("settings file {path} is malformed: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
