use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};

use cmps14_signalk::angle::CompassPoint;
use cmps14_signalk::cal_mode::CalMode;
use cmps14_signalk::cmps14::Cmps14;
use cmps14_signalk::config::CAL_OK_REQUIRED;
use cmps14_signalk::preferences::Preferences;
use cmps14_signalk::processor::Processor;
use cmps14_signalk::sensor::CompassLink;
use cmps14_signalk::timing::MonotonicClock;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Module calibrates and saves by itself
    FullAuto,
    /// Saved here once quality stays at maximum
    Auto,
    /// Like auto; the module runs without autosave either way
    Manual,
}

impl From<Mode> for CalMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::FullAuto => CalMode::FullAuto,
            Mode::Auto => CalMode::Auto,
            Mode::Manual => CalMode::Manual,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "calibrate")]
#[command(about = "CMPS14 calibration tool", long_about = None)]
struct Args {
    /// Settings file, for the I2C bus and address
    #[arg(long, default_value = "cmps14.json")]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "manual")]
    mode: Mode,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 300)]
    max_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║     CMPS14 Calibration Tool                          ║");
    println!("╚══════════════════════════════════════════════════════╝\n");

    println!("Instructions:");
    println!("1. Rotate the unit slowly through a full 360° circle");
    println!("2. Tilt it nose up/down and side to side while turning");
    println!("3. Hold still for a few seconds now and then (gyro)");
    println!("4. Keep away from steel and running motors\n");

    let settings = Preferences::load(&args.config)?.settings().clone();
    let mut compass = Cmps14::new(settings.i2c_bus, settings.i2c_address)?;
    if !compass.is_available() {
        return Err("CMPS14 not responding".into());
    }
    let mut processor = Processor::new(compass);

    let clock = MonotonicClock::new();
    let mode = CalMode::from(args.mode);
    if !processor.start_calibration(mode, clock.now_ms()) {
        processor.stop_calibration();
        return Err(format!("CMPS14 did not enter {} calibration", mode).into());
    }

    println!("Calibrating ({})... (ROTATE NOW!)", mode);
    println!(
        "\n{:^8} | {:^10} | {:^5} | {:^5} | {:^5} | {:^5} | {:^8}",
        "Time", "Heading", "Mag", "Acc", "Gyr", "Sys", "Good"
    );
    println!(
        "{:-<8}-+-{:-<10}-+-{:-<5}-+-{:-<5}-+-{:-<5}-+-{:-<5}-+-{:-<8}",
        "", "", "", "", "", "", ""
    );

    let started = Instant::now();
    let mut saved = false;
    while started.elapsed() < Duration::from_secs(args.max_secs) {
        thread::sleep(Duration::from_millis(500));

        processor.update();
        let heading = processor.compass_deg();
        let heading = format!("{:>5.1}° {:<3}", heading, CompassPoint::from_heading(heading).abbreviation());

        // FULL AUTO stores its own profile
        let quality = processor.monitor_calibration(false);
        let good = processor.calibration_state().cal_ok_count;
        match quality {
            Some(q) => println!(
                "{:>7.1}s | {:^10} | {:^5} | {:^5} | {:^5} | {:^5} | {:>4}/{}",
                started.elapsed().as_secs_f64(),
                heading,
                q.mag,
                q.acc,
                q.gyr,
                q.sys,
                good,
                CAL_OK_REQUIRED
            ),
            None => println!("{:>7.1}s | status read failed", started.elapsed().as_secs_f64()),
        }

        if mode != CalMode::FullAuto && good >= CAL_OK_REQUIRED {
            saved = processor.save_calibration_profile();
            break;
        }
    }

    // Always leave the module in normal operation
    processor.stop_calibration();

    match (mode, saved) {
        (CalMode::FullAuto, _) => println!("\nFULL AUTO stopped; the module keeps what it saved."),
        (_, true) => println!("\n✓ Calibration profile stored."),
        (_, false) => {
            println!("\n✗ Calibration not stored.");
            return Err("calibration quality not reached".into());
        }
    }
    Ok(())
}
