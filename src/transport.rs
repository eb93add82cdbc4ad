//! Websocket transport underneath the SignalK broker.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use tungstenite::http::Uri;
use tungstenite::{Message, WebSocket};

use crate::error::BrokerError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsEvent {
    Closed,
    Message(String),
    Ping(Vec<u8>),
    Pong,
}

/// A text-frame websocket the broker can drive from a polling loop.
pub trait WsTransport {
    fn connect(&mut self, url: &str) -> Result<(), BrokerError>;
    fn send_text(&mut self, text: &str) -> Result<(), BrokerError>;
    /// Everything received since the last call. Never blocks.
    fn poll(&mut self) -> Vec<WsEvent>;
    fn pong(&mut self, payload: &[u8]) -> Result<(), BrokerError>;
    fn close(&mut self);
}

pub struct TungsteniteTransport {
    socket: Option<WebSocket<TcpStream>>,
    connect_timeout: Duration,
    // host, port and address of the last lookup; DNS has no timeout
    resolved: Option<(String, u16, SocketAddr)>,
}

fn would_block(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock)
}

impl TungsteniteTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            socket: None,
            connect_timeout,
            resolved: None,
        }
    }

    fn resolve(&mut self, host: &str, port: u16) -> Result<SocketAddr, BrokerError> {
        if let Some((h, p, addr)) = &self.resolved
            && h == host
            && *p == port
        {
            return Ok(*addr);
        }
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| BrokerError::ConnectFailed(host.to_string(), "cannot resolve".into()))?;
        debug!("Resolved {} to {}", host, addr);
        self.resolved = Some((host.to_string(), port, addr));
        Ok(addr)
    }

    fn open_stream(&mut self, url: &str) -> Result<TcpStream, BrokerError> {
        let fail = |reason: String| BrokerError::ConnectFailed(url.to_string(), reason);

        let uri: Uri = url.parse().map_err(|e: tungstenite::http::uri::InvalidUri| fail(e.to_string()))?;
        let host = uri.host().ok_or_else(|| fail("missing host".into()))?;
        let port = uri.port_u16().unwrap_or(80);
        let addr = self.resolve(host, port)?;

        let stream = match TcpStream::connect_timeout(&addr, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                // look the host up again next time, it may have moved
                self.resolved = None;
                return Err(e.into());
            }
        };
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl WsTransport for TungsteniteTransport {
    fn connect(&mut self, url: &str) -> Result<(), BrokerError> {
        self.close();
        let stream = self.open_stream(url)?;
        let (socket, _response) = tungstenite::client(url, stream)
            .map_err(|e| BrokerError::ConnectFailed(url.to_string(), e.to_string()))?;
        // Handshake done; from here on the loop only polls
        socket.get_ref().set_nonblocking(true)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), BrokerError> {
        let socket = self.socket.as_mut().ok_or(BrokerError::NotOpen)?;
        match socket.send(Message::Text(text.to_string())) {
            Ok(()) => Ok(()),
            // queued; flushed on a later write or poll
            Err(e) if would_block(&e) => Ok(()),
            Err(e) => Err(BrokerError::SendFailed(e.to_string())),
        }
    }

    fn poll(&mut self) -> Vec<WsEvent> {
        let mut events = Vec::new();
        let Some(socket) = self.socket.as_mut() else {
            return events;
        };

        let mut closed = false;
        while !closed {
            match socket.read() {
                Ok(Message::Text(text)) => events.push(WsEvent::Message(text)),
                Ok(Message::Ping(payload)) => events.push(WsEvent::Ping(payload)),
                Ok(Message::Pong(_)) => events.push(WsEvent::Pong),
                Ok(Message::Close(_)) => closed = true,
                Ok(_) => {}
                Err(e) if would_block(&e) => break,
                Err(e) => {
                    debug!("Websocket read ended: {}", e);
                    closed = true;
                }
            }
        }

        if closed {
            events.push(WsEvent::Closed);
            self.socket = None;
        }
        events
    }

    fn pong(&mut self, payload: &[u8]) -> Result<(), BrokerError> {
        let socket = self.socket.as_mut().ok_or(BrokerError::NotOpen)?;
        let result = socket
            .send(Message::Pong(payload.to_vec()))
            .and_then(|()| socket.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if would_block(&e) => Ok(()),
            Err(e) => Err(BrokerError::SendFailed(e.to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn transport() -> TungsteniteTransport {
        TungsteniteTransport::new(Duration::from_millis(500))
    }

    #[test]
    fn test_address_is_cached() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut t = transport();

        t.open_stream(&format!("ws://127.0.0.1:{}/signalk/v1/stream", addr.port()))
            .unwrap();
        assert_eq!(t.resolved, Some(("127.0.0.1".to_string(), addr.port(), addr)));

        // a cached host is never looked up again
        t.resolved = Some(("signalk.invalid".to_string(), addr.port(), addr));
        t.open_stream(&format!("ws://signalk.invalid:{}/signalk/v1/stream", addr.port()))
            .unwrap();
    }

    #[test]
    fn test_refused_connect_drops_cache() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut t = transport();
        assert!(t.open_stream(&format!("ws://127.0.0.1:{port}/signalk/v1/stream")).is_err());
        assert!(t.resolved.is_none());
    }

    #[test]
    fn test_send_without_socket() {
        let mut t = transport();
        assert!(matches!(t.send_text("{}"), Err(BrokerError::NotOpen)));
        assert!(t.poll().is_empty());
    }
}
