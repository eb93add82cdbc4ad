use std::fmt;

use serde::{Deserialize, Serialize};

/// Calibration modes of the CMPS14.
///
/// - `Use`: normal operation, no calibration running
/// - `FullAuto`: built in background calibration with the module's own autosave
/// - `Auto`: background calibration, profile saved once quality is good enough
/// - `Manual`: background calibration, the operator decides when to save
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalMode {
    #[default]
    Use,
    FullAuto,
    Auto,
    Manual,
}

impl CalMode {
    pub fn name(self) -> &'static str {
        match self {
            CalMode::Use => "USE",
            CalMode::FullAuto => "FULL AUTO",
            CalMode::Auto => "AUTO",
            CalMode::Manual => "MANUAL",
        }
    }

    pub fn is_calibrating(self) -> bool {
        self != CalMode::Use
    }
}

impl fmt::Display for CalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
