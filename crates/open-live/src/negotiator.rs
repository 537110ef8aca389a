//! Holds at most one gateway session at a time.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gateway::{Session, SessionGateway};

/// Owns the current session and makes sure it is ended before a new one starts.
pub struct SessionNegotiator<G> {
    gateway: G,
    room_key: String,
    current: Option<Session>,
}

impl<G: SessionGateway> SessionNegotiator<G> {
    pub fn new(gateway: G, room_key: impl Into<String>) -> Self {
        Self {
            gateway,
            room_key: room_key.into(),
            current: None,
        }
    }

    /// End any held session, then start and store a fresh one.
    ///
    /// On failure no session is held.
    pub async fn start_session(&mut self) -> Result<&Session> {
        self.end_session().await;

        let session = self.gateway.start_session(&self.room_key).await?;
        info!(
            session_id = %session.session_id,
            endpoints = session.endpoints.len(),
            "Started Open Live session"
        );
        Ok(self.current.insert(session))
    }

    /// End the held session, if any. Failures are logged and otherwise ignored.
    pub async fn end_session(&mut self) {
        let Some(session) = self.current.take() else {
            debug!("No Open Live session to end");
            return;
        };

        if let Err(e) = self.gateway.end_session(&session).await {
            warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to end Open Live session"
            );
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}
