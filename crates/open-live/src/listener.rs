//! Connection supervisor for the Open Live push channel.
//!
//! A listener runs a single control loop: negotiate a session, connect to one
//! of its endpoints, authenticate, then stream frames into the dispatcher while
//! sending heartbeats. Transient failures go back to negotiation after a fixed
//! delay; fatal gateway codes terminate the loop for good.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{auth_frame, heartbeat_frame};
use crate::config::ListenerConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{OpenLiveError, Result};
use crate::gateway::{BliveGateway, Session, SessionGateway};
use crate::handler::DanmuHandler;
use crate::http::install_rustls_provider;
use crate::negotiator::SessionNegotiator;
use crate::tracker::CallbackTracker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Negotiating,
    Connecting,
    Authenticating,
    Streaming,
    Closing,
    /// A fatal gateway error was returned; the listener will not run again.
    Terminated,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Collects chat events from one room and forwards them to a [`DanmuHandler`].
pub struct OpenLiveListener<G = BliveGateway> {
    config: ListenerConfig,
    negotiator: Mutex<SessionNegotiator<G>>,
    dispatcher: EventDispatcher,
    state: RwLock<ListenerState>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl OpenLiveListener<BliveGateway> {
    /// Create a listener talking to the blive.chat gateway.
    pub fn new(config: ListenerConfig, handler: Arc<dyn DanmuHandler>) -> Result<Self> {
        let gateway = BliveGateway::new(&config)?;
        Ok(Self::with_gateway(config, gateway, handler))
    }
}

impl<G: SessionGateway> OpenLiveListener<G> {
    pub fn with_gateway(config: ListenerConfig, gateway: G, handler: Arc<dyn DanmuHandler>) -> Self {
        install_rustls_provider();
        let negotiator = SessionNegotiator::new(gateway, config.room_key.clone());
        Self {
            config,
            negotiator: Mutex::new(negotiator),
            dispatcher: EventDispatcher::new(handler, CallbackTracker::new()),
            state: RwLock::new(ListenerState::Idle),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tracker holding the in-flight handler invocations.
    pub fn tracker(&self) -> &CallbackTracker {
        self.dispatcher.tracker()
    }

    /// Run the listener until it is stopped or a fatal gateway error occurs.
    ///
    /// Returns `Ok(())` after a stop and the fatal error otherwise. The session
    /// held at exit is always ended.
    pub async fn run(&self) -> Result<()> {
        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid listener configuration");
            self.set_state(ListenerState::Terminated);
            return Err(e);
        }

        if self.cancel.is_cancelled() || self.state() == ListenerState::Terminated {
            warn!(state = %self.state(), "Listener has already been shut down");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Listener is already running");
            return Ok(());
        }

        info!(room_key = %self.config.room_key, "Starting Open Live listener");
        let result = self.supervise().await;

        self.negotiator.lock().await.end_session().await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Err(e) => {
                error!(error = %e, "Open Live listener terminated");
                self.set_state(ListenerState::Terminated);
            }
            Ok(()) => {
                info!("Open Live listener stopped");
                self.set_state(ListenerState::Idle);
            }
        }
        result
    }

    /// Stop the loop and wait (bounded) for pending handler invocations.
    pub async fn stop(&self) {
        info!("Stopping Open Live listener");
        self.cancel.cancel();
        self.tracker().drain(self.config.drain_timeout()).await;
    }

    async fn supervise(&self) -> Result<()> {
        let retry_delay = self.config.retry_delay();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match self.run_once().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        error = %e,
                        "Open Live connection failed, retrying in {:?}", retry_delay
                    );
                }
            }

            self.set_state(ListenerState::Negotiating);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }

    /// One pass through negotiate, connect, authenticate and stream.
    ///
    /// Returns `Ok(())` only when stopped; any other exit is an error.
    async fn run_once(&self) -> Result<()> {
        self.set_state(ListenerState::Negotiating);
        // Not raced against stop: an interrupted start_game would leak the session.
        let session = self.negotiator.lock().await.start_session().await?.clone();
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.set_state(ListenerState::Connecting);
        let mut ws = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            ws = self.connect_any(&session) => ws?,
        };

        self.set_state(ListenerState::Authenticating);
        let result = match ws
            .send(Message::Binary(auth_frame(&session.auth_body)))
            .await
        {
            Ok(()) => {
                debug!(session_id = %session.session_id, "Sent auth frame");
                self.set_state(ListenerState::Streaming);
                self.stream(&mut ws).await
            }
            Err(e) => Err(OpenLiveError::connection(format!(
                "failed to send auth frame: {e}"
            ))),
        };

        self.set_state(ListenerState::Closing);
        if let Err(e) = ws.close(None).await {
            debug!(error = %e, "WebSocket close did not complete cleanly");
        }
        result
    }

    async fn connect_any(&self, session: &Session) -> Result<WsStream> {
        let timeout = self.config.connect_timeout();

        for url in &session.endpoints {
            info!("Connecting to WebSocket: {}", url);
            match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((ws, _))) => {
                    info!("Connected to WebSocket: {}", url);
                    return Ok(ws);
                }
                Ok(Err(e)) => warn!(url = %url, error = %e, "WebSocket connection failed"),
                Err(_) => warn!(url = %url, "WebSocket connection timed out after {:?}", timeout),
            }
        }

        Err(OpenLiveError::connection(format!(
            "all {} endpoints failed",
            session.endpoints.len()
        )))
    }

    async fn stream(&self, ws: &mut WsStream) -> Result<()> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    ws.send(Message::Binary(heartbeat_frame()))
                        .await
                        .map_err(|e| OpenLiveError::connection(format!("failed to send heartbeat: {e}")))?;
                    trace!("Sent heartbeat");
                }

                msg = ws.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let forwarded = self.dispatcher.handle_packet(&data);
                        if forwarded > 0 {
                            trace!(forwarded, "Dispatched chat events");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(OpenLiveError::connection(format!(
                            "server closed the connection: {frame:?}"
                        )));
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(text = %text.as_str(), "Ignoring text message");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(OpenLiveError::connection(format!("WebSocket error: {e}")));
                    }
                    None => return Err(OpenLiveError::connection("WebSocket stream closed")),
                },

                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    fn set_state(&self, state: ListenerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Listener state changed");
        }
    }
}
