//! Turns decoded business payloads into events and hands them to the consumer.

use std::sync::Arc;

use serde_json::{Number, Value};
use tracing::{debug, error, info, warn};

use crate::codec::{Frame, op, unpack_frames};
use crate::event::{ForwardedMessage, OpenLiveEvent, UserAttributes};
use crate::handler::DanmuHandler;
use crate::tracker::CallbackTracker;

/// Business command carried in the `cmd` field of a `SEND_MESSAGE` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LIVE_OPEN_PLATFORM_DM`
    Comment,
    /// `LIVE_OPEN_PLATFORM_SUPER_CHAT`
    PaidMessage,
    /// Anything else; ignored so new command types don't break the stream.
    Unrecognized(String),
}

impl Command {
    /// Parse a command string. Only the part before the first `:` is significant.
    pub fn parse(cmd: &str) -> Self {
        let base = cmd.split(':').next().unwrap_or(cmd);
        match base {
            "LIVE_OPEN_PLATFORM_DM" => Self::Comment,
            "LIVE_OPEN_PLATFORM_SUPER_CHAT" => Self::PaidMessage,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

/// Routes frames to the consumer callback.
#[derive(Clone)]
pub struct EventDispatcher {
    handler: Arc<dyn DanmuHandler>,
    tracker: CallbackTracker,
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn DanmuHandler>, tracker: CallbackTracker) -> Self {
        Self { handler, tracker }
    }

    pub fn tracker(&self) -> &CallbackTracker {
        &self.tracker
    }

    /// Handle one binary WebSocket message. Returns the number of events forwarded.
    pub fn handle_packet(&self, data: &[u8]) -> usize {
        unpack_frames(data)
            .iter()
            .map(|frame| self.handle_frame(frame))
            .sum()
    }

    fn handle_frame(&self, frame: &Frame) -> usize {
        match frame.operation {
            op::SEND_MESSAGE | op::AUTH_REPLY => {
                if frame.body.is_empty() {
                    return 0;
                }
                // Invalid UTF-8 must not cost the whole event.
                let body = String::from_utf8_lossy(&frame.body);
                match serde_json::from_str::<Value>(&body) {
                    Ok(payload) => usize::from(self.dispatch(frame.operation, &payload)),
                    Err(e) => {
                        warn!(
                            operation = frame.operation,
                            body = %body,
                            "Received non-JSON business payload: {}",
                            e
                        );
                        0
                    }
                }
            }
            op::HEARTBEAT_REPLY => {
                debug!(popularity = ?frame.popularity(), "Heartbeat reply received");
                0
            }
            other => {
                debug!(operation = other, "Ignoring frame with unknown operation");
                0
            }
        }
    }

    /// Dispatch a decoded payload. Returns whether an event was forwarded.
    pub fn dispatch(&self, operation: u32, payload: &Value) -> bool {
        match operation {
            op::AUTH_REPLY => {
                let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
                if code != 0 {
                    error!(code, payload = %payload, "Open Live authentication failed");
                } else {
                    info!("Open Live authentication succeeded");
                }
                false
            }
            op::SEND_MESSAGE => match parse_event(payload) {
                Some(event) => {
                    self.forward(event);
                    true
                }
                None => false,
            },
            other => {
                debug!(operation = other, "Operation carries no business payload");
                false
            }
        }
    }

    fn forward(&self, event: OpenLiveEvent) {
        let handler = self.handler.clone();
        let message = ForwardedMessage::from(event);
        self.tracker
            .track(async move { handler.on_message(message).await });
    }
}

/// Build an event from a `SEND_MESSAGE` payload, if it carries a known command.
pub fn parse_event(payload: &Value) -> Option<OpenLiveEvent> {
    let cmd = payload.get("cmd").and_then(Value::as_str).unwrap_or("");
    let data = payload.get("data").unwrap_or(&Value::Null);

    match Command::parse(cmd) {
        Command::Comment => Some(parse_comment(data)),
        Command::PaidMessage => Some(parse_paid_message(data)),
        Command::Unrecognized(cmd) => {
            debug!(cmd = %cmd, "Ignoring Open Live command");
            None
        }
    }
}

/// Parse LIVE_OPEN_PLATFORM_DM.
fn parse_comment(data: &Value) -> OpenLiveEvent {
    let sender_name = str_field(data, "uname");
    let mut text = str_field(data, "msg");

    // The channel has no threaded replies, so render them as a mention.
    let reply_name = str_field(data, "reply_uname");
    if !reply_name.is_empty() {
        text = format!("@{} {}", reply_name, text);
    }

    let attributes = UserAttributes {
        is_admin: truthy(data.get("is_admin")),
        ..badge_attributes(data)
    };

    debug!(sender = %sender_name, text = %text, "Open Live comment");

    OpenLiveEvent::Comment {
        sender_name,
        sender_key: str_field(data, "open_id"),
        text,
        attributes,
    }
}

/// Parse LIVE_OPEN_PLATFORM_SUPER_CHAT.
fn parse_paid_message(data: &Value) -> OpenLiveEvent {
    let sender_name = str_field(data, "uname");
    let text = str_field(data, "message");
    let amount = data
        .get("rmb")
        .or_else(|| data.get("price"))
        .and_then(|v| match v {
            Value::Number(n) => Some(n.clone()),
            Value::String(s) => s.trim().parse::<Number>().ok(),
            _ => None,
        })
        .unwrap_or_else(|| Number::from(0));

    info!(sender = %sender_name, amount = %amount, text = %text, "Open Live paid message");

    OpenLiveEvent::PaidMessage {
        sender_name,
        sender_key: str_field(data, "open_id"),
        text,
        amount,
        attributes: badge_attributes(data),
    }
}

/// Fan badge info, only filled in when the sender is wearing the badge.
fn badge_attributes(data: &Value) -> UserAttributes {
    if !truthy(data.get("fans_medal_wearing_status")) {
        return UserAttributes::default();
    }

    UserAttributes {
        fan_badge_name: str_field(data, "fans_medal_name"),
        fan_badge_level: data
            .get("fans_medal_level")
            .and_then(Value::as_u64)
            .and_then(|level| u32::try_from(level).ok())
            .unwrap_or(0),
        ..UserAttributes::default()
    }
}

fn str_field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compress_zlib, encode_frame, ver};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        messages: Mutex<Vec<ForwardedMessage>>,
    }

    #[async_trait]
    impl DanmuHandler for RecordingHandler {
        async fn on_message(&self, message: ForwardedMessage) -> anyhow::Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }
    }

    fn dispatcher() -> (EventDispatcher, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone(), CallbackTracker::new());
        (dispatcher, handler)
    }

    #[test]
    fn test_command_parse_strips_suffix() {
        assert_eq!(Command::parse("LIVE_OPEN_PLATFORM_DM"), Command::Comment);
        assert_eq!(Command::parse("LIVE_OPEN_PLATFORM_DM:4:0"), Command::Comment);
        assert_eq!(
            Command::parse("LIVE_OPEN_PLATFORM_SUPER_CHAT"),
            Command::PaidMessage
        );
        assert_eq!(
            Command::parse("LIVE_OPEN_PLATFORM_SEND_GIFT"),
            Command::Unrecognized("LIVE_OPEN_PLATFORM_SEND_GIFT".to_string())
        );
    }

    #[test]
    fn test_parse_comment() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {"uname": "Alice", "msg": "hello", "open_id": "u123"}
        });

        match parse_event(&payload) {
            Some(OpenLiveEvent::Comment {
                sender_name,
                sender_key,
                text,
                ..
            }) => {
                assert_eq!(sender_name, "Alice");
                assert_eq!(sender_key, "u123");
                assert_eq!(text, "hello");
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_comment_reply_prefix() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {"uname": "Alice", "msg": "hello", "open_id": "u123", "reply_uname": "Bob"}
        });

        let event = parse_event(&payload).expect("comment");
        assert_eq!(event.text(), "@Bob hello");
    }

    #[test]
    fn test_parse_comment_badge_only_when_worn() {
        let worn = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {
                "uname": "A", "msg": "m", "open_id": "o",
                "fans_medal_wearing_status": true,
                "fans_medal_name": "Tea",
                "fans_medal_level": 12,
                "is_admin": 1
            }
        });
        let hidden = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {
                "uname": "A", "msg": "m", "open_id": "o",
                "fans_medal_wearing_status": false,
                "fans_medal_name": "Tea",
                "fans_medal_level": 12
            }
        });

        match parse_event(&worn) {
            Some(OpenLiveEvent::Comment { attributes, .. }) => {
                assert_eq!(attributes.fan_badge_name, "Tea");
                assert_eq!(attributes.fan_badge_level, 12);
                assert!(attributes.is_admin);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
        match parse_event(&hidden) {
            Some(OpenLiveEvent::Comment { attributes, .. }) => {
                assert_eq!(attributes, UserAttributes::default());
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_paid_message_amount_fallback() {
        let with_rmb = json!({
            "cmd": "LIVE_OPEN_PLATFORM_SUPER_CHAT",
            "data": {"uname": "Carol", "message": "hi", "open_id": "o9", "rmb": 30, "price": 3000}
        });
        let with_price = json!({
            "cmd": "LIVE_OPEN_PLATFORM_SUPER_CHAT",
            "data": {"uname": "Carol", "message": "hi", "open_id": "o9", "price": 50}
        });

        match parse_event(&with_rmb) {
            Some(OpenLiveEvent::PaidMessage { amount, text, .. }) => {
                assert_eq!(amount, Number::from(30));
                assert_eq!(text, "hi");
            }
            other => panic!("Unexpected event: {other:?}"),
        }
        match parse_event(&with_price) {
            Some(OpenLiveEvent::PaidMessage { amount, .. }) => assert_eq!(amount, Number::from(50)),
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_fractional_amount_keeps_its_text() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_SUPER_CHAT",
            "data": {"uname": "Carol", "message": "hi", "open_id": "o9", "rmb": 30.5}
        });
        let forwarded = ForwardedMessage::from(parse_event(&payload).unwrap());
        assert_eq!(forwarded.text, "💰¥30.5 hi");
    }

    #[test]
    fn test_out_of_range_badge_level_does_not_wrap() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {
                "uname": "Dave", "msg": "hey", "open_id": "o4",
                "fans_medal_wearing_status": true,
                "fans_medal_name": "club",
                "fans_medal_level": 4_294_967_296u64 + 5
            }
        });
        match parse_event(&payload) {
            Some(OpenLiveEvent::Comment { attributes, .. }) => {
                assert_eq!(attributes.fan_badge_name, "club");
                assert_eq!(attributes.fan_badge_level, 0);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_in_body_still_forwards() {
        let (dispatcher, handler) = dispatcher();

        let mut body = br#"{"cmd":"LIVE_OPEN_PLATFORM_DM","data":{"uname":"Eve","open_id":"o5","msg":"hi"#.to_vec();
        body.push(0xff);
        body.extend_from_slice(br#" there"}}"#);
        let packet = encode_frame(&body, op::SEND_MESSAGE, ver::JSON, 0);

        assert_eq!(dispatcher.handle_packet(&packet), 1);
        dispatcher.tracker().drain(Duration::from_secs(1)).await;

        let messages = handler.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].display_name, "Eve");
        assert!(messages[0].text.starts_with("hi"));
        assert!(messages[0].text.ends_with(" there"));
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let payload = json!({"cmd": "LIVE_OPEN_PLATFORM_LIKE", "data": {}});
        assert!(parse_event(&payload).is_none());
    }

    #[tokio::test]
    async fn test_nested_zlib_frames_dispatch_each_event_once() {
        let (dispatcher, handler) = dispatcher();

        let mut inner = BytesMut::new();
        for (name, msg) in [("Alice", "first"), ("Bob", "second")] {
            let body = json!({
                "cmd": "LIVE_OPEN_PLATFORM_DM",
                "data": {"uname": name, "msg": msg, "open_id": name.to_lowercase()}
            });
            inner.extend_from_slice(&encode_frame(
                body.to_string().as_bytes(),
                op::SEND_MESSAGE,
                ver::JSON,
                0,
            ));
        }
        let outer = encode_frame(&compress_zlib(&inner).unwrap(), op::SEND_MESSAGE, ver::ZLIB, 0);

        assert_eq!(dispatcher.handle_packet(&outer), 2);
        dispatcher.tracker().drain(Duration::from_secs(1)).await;

        let mut texts: Vec<String> = handler
            .messages
            .lock()
            .iter()
            .map(|m| m.text.clone())
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_auth_reply_and_heartbeat_reply_are_not_forwarded() {
        let (dispatcher, handler) = dispatcher();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(
            br#"{"code":-101}"#,
            op::AUTH_REPLY,
            ver::JSON,
            1,
        ));
        buf.extend_from_slice(&encode_frame(
            &7u32.to_be_bytes(),
            op::HEARTBEAT_REPLY,
            ver::INT,
            1,
        ));
        buf.extend_from_slice(&encode_frame(b"not json", op::SEND_MESSAGE, ver::JSON, 1));
        buf.extend_from_slice(&encode_frame(b"{}", 99, ver::JSON, 1));

        assert_eq!(dispatcher.handle_packet(&buf), 0);
        dispatcher.tracker().drain(Duration::from_secs(1)).await;
        assert!(handler.messages.lock().is_empty());
    }
}
