use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use cmps14_signalk::app::App;
use cmps14_signalk::broker::{SignalKBroker, read_mac};
use cmps14_signalk::cmps14::Cmps14;
use cmps14_signalk::config::WS_CONNECT_TIMEOUT_MS;
use cmps14_signalk::preferences::Preferences;
use cmps14_signalk::processor::Processor;
use cmps14_signalk::timing::MonotonicClock;
use cmps14_signalk::transport::TungsteniteTransport;

#[derive(Parser, Debug)]
#[command(name = "cmps14-signalk")]
#[command(about = "CMPS14 compass heading, pitch and roll to SignalK", long_about = None)]
struct Args {
    /// Settings file (JSON). Created with defaults when missing.
    #[arg(long, default_value = "cmps14.json")]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut prefs = Preferences::load(&args.config)?;
    let settings = prefs.settings().clone();

    // A missing module only keeps the processor in USE mode; update() keeps trying
    let compass = Cmps14::new(settings.i2c_bus, settings.i2c_address)?;

    let mut processor = Processor::new(compass);
    prefs.apply(&mut processor)?;

    let clock = MonotonicClock::new();
    if !processor.init_calibration_mode_boot(clock.now_ms()) {
        warn!("Boot calibration mode {} not entered", processor.cal_mode_boot());
    }

    let mac = read_mac(&settings.network_interface).unwrap_or_else(|| {
        warn!("No MAC address for {}", settings.network_interface);
        [0; 6]
    });
    let transport = TungsteniteTransport::new(Duration::from_millis(WS_CONNECT_TIMEOUT_MS));
    let mut app = App::new(processor, SignalKBroker::new(transport), settings.signalk, mac);
    app.connect(clock.now_ms());

    info!("Running, settings from {}", prefs.path().display());
    loop {
        app.tick(clock.now_ms());
        thread::sleep(Duration::from_millis(5));
    }
}
