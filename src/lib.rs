pub mod angle;
pub mod app;
pub mod broker;
pub mod cal_mode;
pub mod cmps14;
pub mod config;
pub mod error;
pub mod harmonic;
pub mod preferences;
pub mod processor;
pub mod sensor;
pub mod signalk;
pub mod timing;
pub mod transport;

// Re-export commonly used types
pub use app::App;
pub use cal_mode::CalMode;
pub use processor::Processor;

// This module is only compiled during testing.
#[cfg(test)]
pub(crate) mod mocks;
