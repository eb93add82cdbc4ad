//! Settings persisted across restarts, kept in a JSON file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::cal_mode::CalMode;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::harmonic::HarmonicCoeffs;
use crate::processor::Processor;
use crate::sensor::CompassLink;

pub struct Preferences {
    path: PathBuf,
    settings: Settings,
}

impl Preferences {
    /// Read settings from `path`. A missing file gives the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let settings = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(Self { path, settings })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Push the stored settings into the processor. Coefficients missing from
    /// the file are fitted from the measured deviations and written back.
    pub fn apply<L: CompassLink>(&mut self, processor: &mut Processor<L>) -> Result<(), ConfigError> {
        let s = &self.settings;
        processor.set_installation_offset(s.installation_offset_deg);
        processor.set_manual_variation(s.manual_variation_deg);
        processor.set_send_heading_true(s.send_heading_true);
        processor.set_cal_mode_boot(s.cal_mode_boot);
        processor.set_full_auto_timeout(s.full_auto_timeout_ms);

        match s.harmonic_coeffs {
            Some(coeffs) => {
                processor.restore_deviation_model(s.measured_deviations_deg, coeffs);
                Ok(())
            }
            None => {
                let coeffs = processor.set_measured_deviations(s.measured_deviations_deg);
                self.settings.harmonic_coeffs = Some(coeffs);
                self.write()
            }
        }
    }

    pub fn save_installation_offset(&mut self, deg: f64) -> Result<(), ConfigError> {
        self.settings.installation_offset_deg = deg;
        self.write()
    }

    pub fn save_manual_variation(&mut self, deg: f64) -> Result<(), ConfigError> {
        self.settings.manual_variation_deg = deg;
        self.write()
    }

    pub fn save_deviation_settings(
        &mut self,
        deviations_deg: [f64; 8],
        coeffs: HarmonicCoeffs,
    ) -> Result<(), ConfigError> {
        self.settings.measured_deviations_deg = deviations_deg;
        self.settings.harmonic_coeffs = Some(coeffs);
        self.write()
    }

    pub fn save_calibration_settings(
        &mut self,
        boot_mode: CalMode,
        full_auto_timeout_ms: u32,
    ) -> Result<(), ConfigError> {
        self.settings.cal_mode_boot = boot_mode;
        self.settings.full_auto_timeout_ms = full_auto_timeout_ms;
        self.write()
    }

    pub fn save_send_heading_true(&mut self, enable: bool) -> Result<(), ConfigError> {
        self.settings.send_heading_true = enable;
        self.write()
    }

    fn write(&self) -> Result<(), ConfigError> {
        let path = self.path.display().to_string();
        let text = serde_json::to_string_pretty(&self.settings).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&self.path, text).map_err(|source| ConfigError::Io { path, source })?;
        debug!("Settings written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::mock_link::MockLink;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let prefs = Preferences::load(dir.path().join("none.json")).unwrap();
        assert_eq!(prefs.settings(), &Settings::default());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Preferences::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_apply_fits_and_writes_back_coeffs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmps14.json");
        fs::write(
            &path,
            r#"{ "installation_offset_deg": 12.5, "measured_deviations_deg": [1,1,1,1,1,1,1,1] }"#,
        )
        .unwrap();

        let mut prefs = Preferences::load(&path).unwrap();
        let mut processor = Processor::new(MockLink::default());
        prefs.apply(&mut processor).unwrap();

        assert_eq!(processor.installation_offset_deg(), 12.5);
        assert!((processor.harmonic_coeffs().a - 1.0).abs() < 1e-9);

        let reloaded = Preferences::load(&path).unwrap();
        let coeffs = reloaded.settings().harmonic_coeffs.unwrap();
        assert!((coeffs.a - 1.0).abs() < 1e-9);
        assert_eq!(reloaded.settings().installation_offset_deg, 12.5);
    }

    #[test]
    fn test_apply_uses_stored_coeffs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmps14.json");
        // stored coefficients win over the measured table
        fs::write(
            &path,
            r#"{ "measured_deviations_deg": [0,0,0,0,0,0,0,0],
                 "harmonic_coeffs": { "a": 2.0, "b": 0.0, "c": 0.0, "d": 0.0, "e": 0.0 } }"#,
        )
        .unwrap();

        let mut prefs = Preferences::load(&path).unwrap();
        let mut processor = Processor::new(MockLink::default());
        prefs.apply(&mut processor).unwrap();
        assert_eq!(processor.harmonic_coeffs().a, 2.0);
        assert_eq!(processor.measured_deviations(), [0.0; 8]);
    }

    #[test]
    fn test_save_operations_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmps14.json");
        let mut prefs = Preferences::load(&path).unwrap();

        prefs.save_installation_offset(-3.0).unwrap();
        prefs.save_manual_variation(6.5).unwrap();
        prefs.save_calibration_settings(CalMode::FullAuto, 60_000).unwrap();
        prefs.save_send_heading_true(false).unwrap();
        let coeffs = HarmonicCoeffs {
            a: 0.5,
            ..Default::default()
        };
        prefs.save_deviation_settings([0.5; 8], coeffs).unwrap();

        let s = Preferences::load(&path).unwrap().settings().clone();
        assert_eq!(s.installation_offset_deg, -3.0);
        assert_eq!(s.manual_variation_deg, 6.5);
        assert_eq!(s.cal_mode_boot, CalMode::FullAuto);
        assert_eq!(s.full_auto_timeout_ms, 60_000);
        assert!(!s.send_heading_true);
        assert_eq!(s.measured_deviations_deg, [0.5; 8]);
        assert_eq!(s.harmonic_coeffs, Some(coeffs));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let mut prefs = Preferences::load(dir.path().join("missing-dir").join("cmps14.json")).unwrap();
        assert!(matches!(
            prefs.save_manual_variation(1.0),
            Err(ConfigError::Io { .. })
        ));
    }
}
