// This file is only compiled during tests

use std::collections::VecDeque;

use crate::error::BrokerError;
use crate::transport::{WsEvent, WsTransport};

/// Scripted websocket: records what is sent, replays queued events.
#[derive(Default)]
pub struct MockTransport {
    pub refuse_connect: bool,
    pub fail_send: bool,
    pub open: bool,
    pub urls: Vec<String>,
    pub sent: Vec<String>,
    pub inbox: VecDeque<WsEvent>,
    pub pongs: usize,
    pub closes: usize,
}

impl MockTransport {
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// Paths carried by the `n`th sent frame.
    pub fn paths(&self, n: usize) -> Vec<String> {
        let doc: serde_json::Value = serde_json::from_str(&self.sent[n]).unwrap();
        doc["updates"][0]["values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["path"].as_str().unwrap().to_string())
            .collect()
    }
}

impl WsTransport for MockTransport {
    fn connect(&mut self, url: &str) -> Result<(), BrokerError> {
        self.urls.push(url.to_string());
        if self.refuse_connect {
            return Err(BrokerError::ConnectFailed(url.to_string(), "refused".into()));
        }
        self.open = true;
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), BrokerError> {
        if !self.open {
            return Err(BrokerError::NotOpen);
        }
        if self.fail_send {
            return Err(BrokerError::SendFailed("broken pipe".into()));
        }
        self.sent.push(text.to_string());
        Ok(())
    }

    fn poll(&mut self) -> Vec<WsEvent> {
        self.inbox.drain(..).collect()
    }

    fn pong(&mut self, _payload: &[u8]) -> Result<(), BrokerError> {
        self.pongs += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.closes += 1;
    }
}
