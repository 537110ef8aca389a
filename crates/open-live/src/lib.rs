//! Open Live: live chat (danmu) collection from the Bilibili Open Live push channel.
//!
//! A listener negotiates a session with the blive.chat gateway, connects to the
//! push WebSocket, decodes the binary frame protocol and forwards chat events to
//! a consumer callback.
//!
//! ## Core Types
//!
//! - [`OpenLiveListener`] - Connection supervisor (negotiate, connect, stream, retry)
//! - [`ListenerConfig`] - Listener settings, built once and passed in
//! - [`DanmuHandler`] - Consumer callback trait
//! - [`ForwardedMessage`] - The record handed to the callback
//! - [`OpenLiveEvent`] - Comment and paid message events
//!
//! ## Session negotiation
//!
//! - [`SessionGateway`] - Start/end session calls
//! - [`BliveGateway`] - HTTP implementation against the blive.chat gateway
//! - [`SessionNegotiator`] - Keeps at most one session alive
//!
//! ## Wire protocol
//!
//! - [`codec`] - Frame header encoding, decoding and payload decompression
//! - [`EventDispatcher`] - Decoded payloads to events
//! - [`CallbackTracker`] - In-flight callback accounting and bounded drain

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handler;
pub mod http;
pub mod listener;
pub mod negotiator;
pub mod tracker;

pub use codec::Frame;
pub use config::ListenerConfig;
pub use dispatcher::{Command, EventDispatcher, parse_event};
pub use error::{FATAL_GATEWAY_CODES, OpenLiveError, Result};
pub use event::{ForwardedMessage, OpenLiveEvent, UserAttributes};
pub use gateway::{BliveGateway, Session, SessionGateway};
pub use handler::DanmuHandler;
pub use listener::{ListenerState, OpenLiveListener};
pub use negotiator::SessionNegotiator;
pub use tracker::CallbackTracker;
