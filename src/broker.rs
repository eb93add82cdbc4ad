//! SignalK telemetry broker.
//!
//! Owns the websocket to the SignalK server, publishes heading and attitude
//! deltas through a deadband, and feeds live magnetic variation back into the
//! processor. Reconnect timing belongs to the caller (see `timing::Backoff`).

use std::fs;

use log::{debug, info, warn};
use serde::Serialize;

use crate::angle::ang_diff_rad;
use crate::config::{
    DEADBAND_ATTITUDE_RAD, DEADBAND_HEADING_RAD, SOURCE_PREFIX, SignalKSettings,
    VARIATION_PERIOD_MS,
};
use crate::error::BrokerError;
use crate::processor::{HeadingDelta, MinMaxDelta, VariationFeed};
use crate::signalk::{self, Delta, InboundDelta, PathValue, Subscribe};
use crate::transport::{WsEvent, WsTransport};

/// Callbacks for websocket events, dispatched by [`SignalKBroker::handle_status`].
pub trait WsEvents {
    fn on_open(&mut self, feed: &mut dyn VariationFeed);
    fn on_close(&mut self);
    fn on_message(&mut self, text: &str, feed: &mut dyn VariationFeed);
    fn on_ping(&mut self, payload: &[u8]);
}

/// `ws://host:port/signalk/v1/stream`, with `?token=` when a token is set.
/// `None` when no server is configured.
pub fn stream_url(settings: &SignalKSettings) -> Option<String> {
    if settings.host.is_empty() || settings.port == 0 {
        return None;
    }
    let mut url = format!("ws://{}:{}/signalk/v1/stream", settings.host, settings.port);
    if !settings.token.is_empty() {
        url.push_str("?token=");
        url.push_str(&settings.token);
    }
    Some(url)
}

/// Source name seen by the server, from the last three octets of the MAC.
pub fn source_id(mac: [u8; 6]) -> String {
    format!("{}{:02x}{:02x}{:02x}", SOURCE_PREFIX, mac[3], mac[4], mac[5])
}

/// MAC address of a network interface, e.g. `wlan0`.
pub fn read_mac(interface: &str) -> Option<[u8; 6]> {
    let text = fs::read_to_string(format!("/sys/class/net/{interface}/address")).ok()?;
    parse_mac(text.trim())
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for octet in mac.iter_mut() {
        *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

fn angle_changed(last: Option<f64>, value: f64) -> bool {
    last.is_none_or(|l| ang_diff_rad(value, l).abs() >= DEADBAND_HEADING_RAD)
}

fn attitude_changed(last: Option<f64>, value: f64) -> bool {
    last.is_none_or(|l| (value - l).abs() >= DEADBAND_ATTITUDE_RAD)
}

/// A new extreme worth publishing: finite and not exactly what was sent last.
fn extreme_changed(last: Option<f64>, value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && last.is_none_or(|l| l.to_bits() != v.to_bits()))
}

pub struct SignalKBroker<T: WsTransport> {
    transport: T,
    url: Option<String>,
    source: String,
    ws_open: bool,

    // Last values actually published; kept across reconnects
    last_heading: Option<f64>,
    last_pitch: Option<f64>,
    last_roll: Option<f64>,
    last_extremes: MinMaxDelta,
}

impl<T: WsTransport> SignalKBroker<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            url: None,
            source: source_id([0; 6]),
            ws_open: false,
            last_heading: None,
            last_pitch: None,
            last_roll: None,
            last_extremes: MinMaxDelta::default(),
        }
    }

    /// Configure server and source name, then make the first connection attempt.
    pub fn begin(
        &mut self,
        settings: &SignalKSettings,
        mac: [u8; 6],
        feed: &mut dyn VariationFeed,
    ) -> Result<bool, BrokerError> {
        self.source = source_id(mac);
        self.url = stream_url(settings);
        if self.url.is_none() {
            return Err(BrokerError::NotConfigured);
        }
        info!("SignalK source {}", self.source);
        Ok(self.connect_websocket(feed))
    }

    pub fn connect_websocket(&mut self, feed: &mut dyn VariationFeed) -> bool {
        let Some(url) = self.url.clone() else {
            return false;
        };
        match self.transport.connect(&url) {
            Ok(()) => {
                info!("SignalK websocket open: {}", url);
                self.on_open(feed);
            }
            Err(e) => {
                debug!("SignalK connect failed: {}", e);
                self.ws_open = false;
            }
        }
        self.ws_open
    }

    pub fn close_websocket(&mut self) {
        self.transport.close();
        self.ws_open = false;
    }

    /// Pump the socket. Must run every scheduler tick or the link goes stale.
    pub fn handle_status(&mut self, feed: &mut dyn VariationFeed) {
        if !self.ws_open {
            return;
        }
        for event in self.transport.poll() {
            match event {
                WsEvent::Message(text) => self.on_message(&text, feed),
                WsEvent::Ping(payload) => self.on_ping(&payload),
                WsEvent::Pong => {}
                WsEvent::Closed => self.on_close(),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.ws_open
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn send_json<M: Serialize>(&mut self, msg: &M) -> bool {
        let sent = serde_json::to_string(msg)
            .map_err(BrokerError::from)
            .and_then(|text| self.transport.send_text(&text));
        match sent {
            Ok(()) => true,
            Err(e) => {
                warn!("SignalK send failed, closing websocket: {}", e);
                self.close_websocket();
                false
            }
        }
    }

    /// Publish heading, pitch and roll that moved past the deadband.
    /// True heading rides along with every magnetic heading change when
    /// `send_heading_true` is set. Returns whether a frame was sent.
    pub fn send_hdg_pitch_roll_delta(&mut self, delta: HeadingDelta, send_heading_true: bool) -> bool {
        if !self.ws_open {
            return false;
        }
        if !(delta.heading_rad.is_finite() && delta.pitch_rad.is_finite() && delta.roll_rad.is_finite()) {
            return false;
        }

        let changed_h = angle_changed(self.last_heading, delta.heading_rad);
        let changed_p = attitude_changed(self.last_pitch, delta.pitch_rad);
        let changed_r = attitude_changed(self.last_roll, delta.roll_rad);
        if !(changed_h || changed_p || changed_r) {
            return false;
        }

        let mut values = Vec::with_capacity(4);
        if changed_h {
            values.push(PathValue {
                path: signalk::PATH_HEADING_MAGNETIC,
                value: delta.heading_rad,
            });
        }
        if changed_p {
            values.push(PathValue {
                path: signalk::PATH_PITCH,
                value: delta.pitch_rad,
            });
        }
        if changed_r {
            values.push(PathValue {
                path: signalk::PATH_ROLL,
                value: delta.roll_rad,
            });
        }
        if changed_h && send_heading_true && delta.heading_true_rad.is_finite() {
            values.push(PathValue {
                path: signalk::PATH_HEADING_TRUE,
                value: delta.heading_true_rad,
            });
        }

        let source = self.source.clone();
        if !self.send_json(&Delta::from_source(&source, values)) {
            return false;
        }

        // Baselines are what the server actually received
        if changed_h {
            self.last_heading = Some(delta.heading_rad);
        }
        if changed_p {
            self.last_pitch = Some(delta.pitch_rad);
        }
        if changed_r {
            self.last_roll = Some(delta.roll_rad);
        }
        true
    }

    /// Publish new pitch/roll extremes. Baselines move only after a successful send.
    pub fn send_pitch_roll_minmax_delta(&mut self, minmax: MinMaxDelta) -> bool {
        if !self.ws_open {
            return false;
        }

        let last = self.last_extremes;
        let fields = [
            (signalk::PATH_PITCH_MIN, extreme_changed(last.pitch_min, minmax.pitch_min)),
            (signalk::PATH_PITCH_MAX, extreme_changed(last.pitch_max, minmax.pitch_max)),
            (signalk::PATH_ROLL_MIN, extreme_changed(last.roll_min, minmax.roll_min)),
            (signalk::PATH_ROLL_MAX, extreme_changed(last.roll_max, minmax.roll_max)),
        ];
        let values: Vec<PathValue> = fields
            .iter()
            .filter_map(|&(path, v)| v.map(|value| PathValue { path, value }))
            .collect();
        if values.is_empty() {
            return false;
        }

        let source = self.source.clone();
        if !self.send_json(&Delta::from_source(&source, values)) {
            return false;
        }

        let [pitch_min, pitch_max, roll_min, roll_max] = fields.map(|(_, v)| v);
        let baseline = &mut self.last_extremes;
        baseline.pitch_min = pitch_min.or(baseline.pitch_min);
        baseline.pitch_max = pitch_max.or(baseline.pitch_max);
        baseline.roll_min = roll_min.or(baseline.roll_min);
        baseline.roll_max = roll_max.or(baseline.roll_max);
        true
    }
}

impl<T: WsTransport> WsEvents for SignalKBroker<T> {
    /// Subscribe to live magnetic variation when true heading is published.
    fn on_open(&mut self, feed: &mut dyn VariationFeed) {
        self.ws_open = true;
        if !feed.is_sending_heading_true() {
            return;
        }
        let subscribe = Subscribe::delta(signalk::PATH_MAGNETIC_VARIATION, VARIATION_PERIOD_MS);
        if self.send_json(&subscribe) {
            debug!("Subscribed to {}", signalk::PATH_MAGNETIC_VARIATION);
        }
    }

    fn on_close(&mut self) {
        if self.ws_open {
            info!("SignalK websocket closed");
        }
        self.ws_open = false;
    }

    fn on_message(&mut self, text: &str, feed: &mut dyn VariationFeed) {
        if !feed.is_sending_heading_true() {
            return;
        }
        let Some(delta) = InboundDelta::parse(text) else {
            return;
        };
        for rad in delta.numbers_for(signalk::PATH_MAGNETIC_VARIATION) {
            if rad.is_finite() {
                feed.set_use_manual_variation(false);
                feed.set_live_variation(rad.to_degrees());
            } else {
                feed.set_use_manual_variation(true);
            }
        }
    }

    fn on_ping(&mut self, payload: &[u8]) {
        if let Err(e) = self.transport.pong(payload) {
            debug!("Pong failed: {}", e);
        }
    }
}
