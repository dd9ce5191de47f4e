//! Realtime channel to the backend
//!
//! One WebSocket per client. Text frames are handed to a [`FrameSink`] in
//! arrival order by a single reader task. There is no backoff: a health
//! monitor checks the ready state on a fixed period and reconnects whenever
//! the socket is not open.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::error::{ClientError, Result};
use crate::session::{Session, SessionHost};

type SocketWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Sub-protocol every connection offers.
pub const JSON_PROTOCOL: &str = "json";

/// Receives inbound text frames.
pub trait FrameSink: Send + Sync {
    fn handle_frame(&self, frame: &str);
}

/// Connection state, mirroring the browser socket's `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Socket URL for a backend base URL.
///
/// The scheme of `base_url` is discarded; `secure` picks `wss` or `ws`.
pub fn websocket_url(base_url: &str, secure: bool) -> String {
    let host = base_url
        .split_once("://")
        .map_or(base_url, |(_, rest)| rest)
        .trim_end_matches('/');
    let scheme = if secure { "wss" } else { "ws" };
    format!("{}://{}/ws", scheme, host)
}

/// Sub-protocols offered for a session.
///
/// An empty authenticator name is left out, since an empty token is not a
/// valid protocol entry.
pub fn subprotocols(session: Option<&Session>) -> Vec<String> {
    let mut protocols = vec![JSON_PROTOCOL.to_string()];
    if let Some((token, authenticator)) = session.and_then(Session::credentials) {
        protocols.push(token.to_string());
        if !authenticator.is_empty() {
            protocols.push(authenticator.to_string());
        }
    }
    protocols
}

/// Self-healing WebSocket connection.
pub struct RealtimeChannel {
    url: String,
    requires_session: bool,
    session: Arc<dyn SessionHost>,
    sink: Arc<dyn FrameSink>,
    state: Arc<AtomicU8>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Arc<tokio::sync::Mutex<Option<SocketWriter>>>,
}

impl RealtimeChannel {
    pub fn new(
        settings: &ClientSettings,
        session: Arc<dyn SessionHost>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            url: websocket_url(&settings.base_url, settings.is_secure()),
            requires_session: settings.session_key().is_some(),
            session,
            sink,
            state: Arc::new(AtomicU8::new(ReadyState::Closed as u8)),
            reader: Mutex::new(None),
            writer: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Open the socket, replacing any previous one.
    ///
    /// Returns `Ok(false)` without connecting when sessions are required but
    /// the stored session has no token or authenticator.
    pub async fn connect(&self) -> Result<bool> {
        let session = if self.requires_session {
            match self.usable_session().await {
                Some(session) => Some(session),
                None => {
                    debug!("no usable session, not connecting");
                    self.set_state(ReadyState::Closed);
                    return Ok(false);
                }
            }
        } else {
            None
        };

        self.stop_reader();
        self.set_state(ReadyState::Connecting);

        let mut request = self.url.as_str().into_client_request()?;
        let protocols = subprotocols(session.as_ref()).join(", ");
        let header = HeaderValue::from_str(&protocols)
            .map_err(|e| ClientError::WebSocket(format!("invalid sub-protocol list: {}", e)))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, header);

        let stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                self.set_state(ReadyState::Closed);
                return Err(e.into());
            }
        };
        info!("Connected to {}", self.url);

        let (writer, mut reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.set_state(ReadyState::Open);

        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => sink.handle_frame(&text),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
            state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        });
        *self.reader.lock() = Some(handle);

        Ok(true)
    }

    async fn usable_session(&self) -> Option<Session> {
        self.session
            .current()
            .await
            .filter(|session| session.credentials().is_some())
    }

    /// Whether [`connect`](Self::connect) would attempt a connection now.
    pub async fn can_connect(&self) -> bool {
        !self.requires_session || self.usable_session().await.is_some()
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    /// Reconnect every `period` while the socket is not open.
    ///
    /// Ticks without a usable session are skipped until one appears.
    pub fn spawn_health_monitor(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut waiting = false;
            loop {
                ticker.tick().await;
                if channel.is_open() {
                    continue;
                }
                if !channel.can_connect().await {
                    if !waiting {
                        info!("No signed-in session, WebSocket waits for one");
                        waiting = true;
                    }
                    continue;
                }
                waiting = false;
                info!("Server WebSocket is not open, reconnecting...");
                if let Err(e) = channel.connect().await {
                    warn!("Reconnecting to WebSocket: {}", e);
                }
            }
        })
    }

    /// Close the socket and stop reading.
    pub async fn close(&self) {
        self.set_state(ReadyState::Closing);
        self.stop_reader();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!("closing socket: {}", e);
            }
        }
        self.set_state(ReadyState::Closed);
    }
}
