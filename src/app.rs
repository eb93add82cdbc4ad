//! Cooperative scheduler tying sensor, processor and broker together.
//!
//! `tick` is called from a polling loop with a wrapping millisecond clock;
//! every task runs on its own interval and none of them blocks for long.

use log::{info, warn};

use crate::broker::SignalKBroker;
use crate::cal_mode::CalMode;
use crate::config::{
    CAL_POLL_INTERVAL_MS, MIN_TX_INTERVAL_MS, MINMAX_TX_INTERVAL_MS, READ_INTERVAL_MS,
    SignalKSettings, WS_RETRY_BASE_MS, WS_RETRY_MAX_MS,
};
use crate::processor::{Processor, VariationFeed};
use crate::sensor::{CalQuality, CompassLink};
use crate::timing::{Backoff, Interval};
use crate::transport::WsTransport;

pub struct App<L: CompassLink, T: WsTransport> {
    processor: Processor<L>,
    broker: SignalKBroker<T>,
    signalk: SignalKSettings,
    mac: [u8; 6],
    configured: bool,

    backoff: Backoff,
    read_timer: Interval,
    cal_timer: Interval,
    tx_timer: Interval,
    minmax_timer: Interval,

    cal_quality: Option<CalQuality>,
}

impl<L: CompassLink, T: WsTransport> App<L, T> {
    pub fn new(
        processor: Processor<L>,
        broker: SignalKBroker<T>,
        signalk: SignalKSettings,
        mac: [u8; 6],
    ) -> Self {
        Self {
            processor,
            broker,
            signalk,
            mac,
            configured: false,
            backoff: Backoff::new(WS_RETRY_BASE_MS, WS_RETRY_MAX_MS),
            read_timer: Interval::new(READ_INTERVAL_MS),
            cal_timer: Interval::new(CAL_POLL_INTERVAL_MS),
            tx_timer: Interval::new(MIN_TX_INTERVAL_MS),
            minmax_timer: Interval::new(MINMAX_TX_INTERVAL_MS),
            cal_quality: None,
        }
    }

    /// First connection to the SignalK server. Later attempts come from `tick`.
    pub fn connect(&mut self, now_ms: u32) -> bool {
        match self.broker.begin(&self.signalk, self.mac, &mut self.processor) {
            Ok(open) => {
                self.configured = true;
                self.after_attempt(open, now_ms);
                open
            }
            Err(e) => {
                warn!("SignalK disabled: {}", e);
                false
            }
        }
    }

    fn after_attempt(&mut self, open: bool, now_ms: u32) {
        if open {
            self.backoff.reset();
        } else {
            let wait = self.backoff.schedule_retry(now_ms);
            info!("SignalK websocket connecting, next try in {} ms", wait);
        }
    }

    pub fn tick(&mut self, now_ms: u32) {
        self.handle_websocket(now_ms);
        self.handle_compass(now_ms);
        self.handle_signalk(now_ms);
    }

    fn handle_websocket(&mut self, now_ms: u32) {
        if !self.configured {
            self.processor.set_use_manual_variation(true);
            return;
        }
        self.broker.handle_status(&mut self.processor);

        if !self.broker.is_open() && self.backoff.due(now_ms) {
            let open = self.broker.connect_websocket(&mut self.processor);
            self.after_attempt(open, now_ms);
        }
        if !self.broker.is_open() {
            self.processor.set_use_manual_variation(true);
        }
    }

    fn handle_compass(&mut self, now_ms: u32) {
        if self.read_timer.ready(now_ms) {
            self.processor.update();
        }

        if self.cal_timer.ready(now_ms) {
            let autosave = self.processor.cal_mode() == CalMode::Auto;
            self.cal_quality = self.processor.monitor_calibration(autosave);
        }

        if self.processor.check_full_auto_timeout(now_ms) {
            info!("FULL AUTO TIMEOUT");
        }
    }

    fn handle_signalk(&mut self, now_ms: u32) {
        if self.tx_timer.ready(now_ms) {
            let send_true = self.processor.is_sending_heading_true();
            self.broker
                .send_hdg_pitch_roll_delta(self.processor.heading_delta(), send_true);
        }
        if self.minmax_timer.ready(now_ms) {
            self.broker
                .send_pitch_roll_minmax_delta(self.processor.minmax_delta());
        }
    }

    pub fn processor(&self) -> &Processor<L> {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut Processor<L> {
        &mut self.processor
    }

    pub fn broker(&self) -> &SignalKBroker<T> {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut SignalKBroker<T> {
        &mut self.broker
    }

    /// Quality reported by the latest calibration poll.
    pub fn cal_quality(&self) -> Option<CalQuality> {
        self.cal_quality
    }

    pub fn retry_interval_ms(&self) -> u32 {
        self.backoff.current_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::mock_link::MockLink;
    use crate::mocks::mock_transport::MockTransport;
    use crate::sensor::CMD_USE_MODE;
    use crate::transport::WsEvent;

    const MAC: [u8; 6] = [0, 0, 0, 0xab, 0xcd, 0xef];
    const GOOD: u8 = 0b11_00_11_11;

    fn settings() -> SignalKSettings {
        SignalKSettings {
            host: "signalk.local".into(),
            port: 3000,
            token: String::new(),
        }
    }

    fn app(transport: MockTransport) -> App<MockLink, MockTransport> {
        let processor = Processor::new(MockLink::with_sample(90.0, 1.0, -1.0));
        App::new(processor, SignalKBroker::new(transport), settings(), MAC)
    }

    #[test]
    fn test_tick_reads_and_publishes() {
        let mut app = app(MockTransport::default());
        assert!(app.connect(0));
        app.broker_mut().transport_mut().sent.clear();

        app.tick(READ_INTERVAL_MS);
        assert!((app.processor().compass_deg() - 90.0).abs() < 1e-9);
        assert!(app.broker().transport().sent.is_empty());

        app.tick(MIN_TX_INTERVAL_MS);
        let paths = app.broker().transport().paths(0);
        assert_eq!(paths[0], "navigation.headingMagnetic");
        assert!(paths.contains(&"navigation.headingTrue".to_string()));

        app.tick(MINMAX_TX_INTERVAL_MS);
        assert_eq!(app.broker().transport().paths(1).len(), 4);
    }

    #[test]
    fn test_reconnect_backoff_doubles_then_resets() {
        let mut app = app(MockTransport {
            refuse_connect: true,
            ..Default::default()
        });
        assert!(!app.connect(0));
        assert_eq!(app.retry_interval_ms(), 4000);

        app.tick(1999);
        assert_eq!(app.broker().transport().urls.len(), 1);
        app.tick(2000);
        assert_eq!(app.broker().transport().urls.len(), 2);
        assert_eq!(app.retry_interval_ms(), 8000);
        app.tick(5999);
        assert_eq!(app.broker().transport().urls.len(), 2);
        app.tick(6000);
        assert_eq!(app.broker().transport().urls.len(), 3);

        app.broker_mut().transport_mut().refuse_connect = false;
        app.tick(14_000);
        assert!(app.broker().is_open());
        assert_eq!(app.retry_interval_ms(), WS_RETRY_BASE_MS);
    }

    #[test]
    fn test_disconnect_forces_manual_variation() {
        let mut app = app(MockTransport::default());
        app.connect(0);
        app.processor_mut().set_manual_variation(-5.0);
        app.broker_mut().transport_mut().inbox.push_back(WsEvent::Message(
            r#"{"updates":[{"values":[{"path":"navigation.magneticVariation","value":0.1}]}]}"#.into(),
        ));
        app.tick(1);
        assert!(!app.processor().uses_manual_variation());

        app.broker_mut().transport_mut().refuse_connect = true;
        app.broker_mut().transport_mut().inbox.push_back(WsEvent::Closed);
        app.tick(2);
        assert!(!app.broker().is_open());
        assert!(app.processor().uses_manual_variation());
        assert_eq!(app.processor().variation_deg(), -5.0);
    }

    #[test]
    fn test_unconfigured_server_never_connects() {
        let processor = Processor::new(MockLink::with_sample(10.0, 0.0, 0.0));
        let mut app = App::new(
            processor,
            SignalKBroker::new(MockTransport::default()),
            SignalKSettings::default(),
            MAC,
        );
        assert!(!app.connect(0));
        for now in (0..5000).step_by(50) {
            app.tick(now);
        }
        assert!(app.broker().transport().urls.is_empty());
        assert!((app.processor().compass_deg() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sensor_keeps_running() {
        let mut link = MockLink::default();
        link.available = false;
        let mut processor = Processor::new(link);
        processor.set_cal_mode_boot(CalMode::FullAuto);
        assert!(!processor.init_calibration_mode_boot(0));
        assert_eq!(processor.cal_mode(), CalMode::Use);

        let mut app = App::new(processor, SignalKBroker::new(MockTransport::default()), settings(), MAC);
        assert!(app.connect(0));
        app.broker_mut().transport_mut().sent.clear();
        app.tick(MIN_TX_INTERVAL_MS);
        assert!(app.broker().transport().sent.is_empty());

        // module comes up late
        app.processor_mut().link_mut().available = true;
        app.processor_mut().link_mut().set_sample(180.0, 0.0, 0.0);
        app.tick(2 * MIN_TX_INTERVAL_MS);
        assert!((app.processor().compass_deg() - 180.0).abs() < 1e-9);
        assert_eq!(app.broker().transport().paths(0)[0], "navigation.headingMagnetic");
    }

    #[test]
    fn test_auto_mode_autosaves_on_poll() {
        let mut app = app(MockTransport::default());
        assert!(app.processor_mut().start_calibration(CalMode::Auto, 0));
        app.processor_mut().link_mut().status_default = Some(GOOD);

        for n in 1..=3 {
            app.tick(n * CAL_POLL_INTERVAL_MS);
        }
        assert_eq!(app.processor().cal_mode(), CalMode::Use);
        assert!(app.processor().calibration_state().profile_stored);
        assert!(app.cal_quality().is_some_and(|q| q.ready_to_save()));
    }

    #[test]
    fn test_manual_mode_waits_for_operator() {
        let mut app = app(MockTransport::default());
        assert!(app.processor_mut().start_calibration(CalMode::Manual, 0));
        app.processor_mut().link_mut().status_default = Some(GOOD);

        for n in 1..=5 {
            app.tick(n * CAL_POLL_INTERVAL_MS);
        }
        assert_eq!(app.processor().cal_mode(), CalMode::Manual);
        assert!(!app.processor().calibration_state().profile_stored);
    }

    #[test]
    fn test_full_auto_times_out_from_tick() {
        let mut app = app(MockTransport::default());
        app.processor_mut().set_full_auto_timeout(10_000);
        assert!(app.processor_mut().start_calibration(CalMode::FullAuto, 1000));

        app.tick(6000);
        assert_eq!(app.processor().cal_mode(), CalMode::FullAuto);
        assert_eq!(app.processor().full_auto_left_ms(), 5000);

        app.tick(11_000);
        assert_eq!(app.processor().cal_mode(), CalMode::Use);
        assert_eq!(app.processor().link().sent.last(), Some(&CMD_USE_MODE));
    }
}
