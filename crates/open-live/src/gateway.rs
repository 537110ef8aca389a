//! Session negotiation with the blive.chat Open Live gateway.
//!
//! The gateway issues a time-boxed session (`start_game`) consisting of a list of
//! WebSocket endpoints and a serialized auth payload, and releases it again on
//! `end_game`. Every started session counts against a per-room limit, so stale
//! sessions must be ended before starting a new one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::{OpenLiveError, Result};
use crate::http::build_client;

/// Gateway bases used when discovery fails.
pub const DEFAULT_API_BASES: [&str; 2] = ["https://api1.blive.chat", "https://api2.blive.chat"];

/// `end_game` codes that mean the session is already gone.
const END_GAME_ACCEPTED_CODES: [i64; 3] = [0, 7000, 7003];

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A negotiated Open Live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// WebSocket endpoints, in order of preference.
    pub endpoints: Vec<String>,
    /// Serialized JSON sent verbatim in the auth frame.
    pub auth_body: String,
    /// Open id of the room owner.
    pub owner_open_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Start/end session calls against the gateway.
#[async_trait]
pub trait SessionGateway: Send + Sync + 'static {
    /// Start a session for the room.
    async fn start_session(&self, room_key: &str) -> Result<Session>;

    /// Release a session. Callers treat failures as non-fatal.
    async fn end_session(&self, session: &Session) -> Result<()>;
}

#[async_trait]
impl<T: SessionGateway + ?Sized> SessionGateway for Arc<T> {
    async fn start_session(&self, room_key: &str) -> Result<Session> {
        (**self).start_session(room_key).await
    }

    async fn end_session(&self, session: &Session) -> Result<()> {
        (**self).end_session(session).await
    }
}

/// Gateway response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default = "missing_code")]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: String,
    data: Option<T>,
}

fn missing_code() -> i64 {
    -1
}

#[derive(Debug, Serialize)]
struct StartGameRequest<'a> {
    code: &'a str,
    app_id: i64,
}

#[derive(Debug, Serialize)]
struct EndGameRequest<'a> {
    app_id: i64,
    game_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StartGameData {
    game_info: GameInfo,
    websocket_info: WebsocketInfo,
    anchor_info: AnchorInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GameInfo {
    game_id: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebsocketInfo {
    wss_link: Vec<String>,
    /// Already serialized JSON, not an object.
    auth_body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnchorInfo {
    open_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EndpointsResponse {
    endpoints: Vec<String>,
}

/// HTTP client for the blive.chat Open Live gateway.
pub struct BliveGateway {
    client: Client,
    app_id: i64,
    discovery_url: String,
    api_base: OnceCell<String>,
}

impl BliveGateway {
    pub fn new(config: &ListenerConfig) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &ListenerConfig) -> Self {
        let configured = config
            .api_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| base.trim_end_matches('/').to_string());

        Self {
            client,
            app_id: config.app_id,
            discovery_url: config.discovery_url.clone(),
            api_base: OnceCell::new_with(configured),
        }
    }

    /// Resolved gateway base, discovering it on first use.
    pub async fn api_base(&self) -> &str {
        self.api_base
            .get_or_init(|| self.discover_api_base())
            .await
            .as_str()
    }

    async fn discover_api_base(&self) -> String {
        let discovered = match self.fetch_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(error = %e, "Failed to fetch gateway endpoints, using defaults");
                Vec::new()
            }
        };

        let base = discovered
            .iter()
            .map(|ep| ep.trim())
            .find(|ep| !ep.is_empty())
            .unwrap_or(DEFAULT_API_BASES[0])
            .trim_end_matches('/')
            .to_string();

        info!(api_base = %base, "Selected Open Live gateway");
        base
    }

    async fn fetch_endpoints(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.discovery_url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OpenLiveError::protocol(format!(
                "endpoint discovery returned HTTP {}",
                response.status()
            )));
        }

        let body: EndpointsResponse = response.json().await?;
        Ok(body.endpoints)
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
        room_key: Option<&str>,
    ) -> Result<ApiResponse<T>> {
        let url = format!("{}{}", self.api_base().await, path);
        debug!(url = %url, "Calling Open Live gateway");

        let mut req = self.client.post(&url).json(body);
        if let Some(room_key) = room_key {
            req = req
                .header(reqwest::header::ORIGIN, "https://blive.chat")
                .header(
                    reqwest::header::REFERER,
                    format!("https://blive.chat/room/{}?roomKeyType=2", room_key),
                );
        }

        let text = req.send().await?.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            OpenLiveError::protocol(format!("{} returned invalid JSON ({}): {:?}", path, e, text))
        })
    }
}

#[async_trait]
impl SessionGateway for BliveGateway {
    async fn start_session(&self, room_key: &str) -> Result<Session> {
        let request = StartGameRequest {
            code: room_key,
            app_id: self.app_id,
        };
        let resp: ApiResponse<StartGameData> = self
            .post("/api/open_live/start_game", &request, Some(room_key))
            .await?;

        if resp.code != 0 {
            return Err(OpenLiveError::gateway(
                resp.code,
                resp.message,
                resp.request_id,
            ));
        }

        let data = resp.data.unwrap_or_default();
        let endpoints: Vec<String> = data
            .websocket_info
            .wss_link
            .into_iter()
            .filter(|url| !url.is_empty())
            .collect();
        let auth_body = data.websocket_info.auth_body;

        if endpoints.is_empty() || auth_body.is_empty() {
            return Err(OpenLiveError::protocol(
                "start_game response is missing websocket_info",
            ));
        }

        let session_id = match data.game_info.game_id {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let owner_open_id = Some(data.anchor_info.open_id).filter(|id| !id.is_empty());

        Ok(Session {
            session_id,
            endpoints,
            auth_body,
            owner_open_id,
            created_at: Utc::now(),
        })
    }

    async fn end_session(&self, session: &Session) -> Result<()> {
        let request = EndGameRequest {
            app_id: self.app_id,
            game_id: &session.session_id,
        };
        let resp: ApiResponse<Value> = match self
            .post("/api/open_live/end_game", &request, None)
            .await
        {
            Ok(resp) => resp,
            Err(OpenLiveError::Protocol(msg)) => {
                warn!("{}", msg);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if END_GAME_ACCEPTED_CODES.contains(&resp.code) {
            info!(
                session_id = %session.session_id,
                code = resp.code,
                "Ended Open Live session"
            );
        } else {
            warn!(
                session_id = %session.session_id,
                code = resp.code,
                message = %resp.message,
                request_id = %resp.request_id,
                "end_game returned an unexpected code"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, routing::get, routing::post};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Recorded {
        start_bodies: Arc<Mutex<Vec<Value>>>,
        end_bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(base: &str) -> BliveGateway {
        let config = ListenerConfig {
            api_base: Some(format!("{base}/")),
            ..ListenerConfig::new("ROOMKEY")
        };
        BliveGateway::new(&config).unwrap()
    }

    fn gateway_router(start_response: Value, end_code: i64, recorded: Recorded) -> Router {
        Router::new()
            .route(
                "/api/open_live/start_game",
                post(
                    move |State(rec): State<Recorded>, Json(body): Json<Value>| {
                        let response = start_response.clone();
                        async move {
                            rec.start_bodies.lock().push(body);
                            Json(response)
                        }
                    },
                ),
            )
            .route(
                "/api/open_live/end_game",
                post(
                    move |State(rec): State<Recorded>, Json(body): Json<Value>| async move {
                        rec.end_bodies.lock().push(body);
                        Json(json!({"code": end_code, "message": "", "request_id": "e1", "data": {}}))
                    },
                ),
            )
            .with_state(recorded)
    }

    fn start_ok() -> Value {
        json!({
            "code": 0,
            "message": "",
            "request_id": "r1",
            "data": {
                "game_info": {"game_id": "game-42"},
                "websocket_info": {
                    "wss_link": ["wss://a.example/sub", "", "wss://b.example/sub"],
                    "auth_body": "{\"key\":\"secret\"}"
                },
                "anchor_info": {"open_id": "owner-1"}
            }
        })
    }

    #[tokio::test]
    async fn test_start_session_parses_response() {
        let recorded = Recorded::default();
        let base = serve(gateway_router(start_ok(), 0, recorded.clone())).await;

        let session = gateway(&base).start_session("ROOMKEY").await.unwrap();

        assert_eq!(session.session_id, "game-42");
        assert_eq!(
            session.endpoints,
            vec!["wss://a.example/sub", "wss://b.example/sub"]
        );
        assert_eq!(session.auth_body, "{\"key\":\"secret\"}");
        assert_eq!(session.owner_open_id.as_deref(), Some("owner-1"));

        let bodies = recorded.start_bodies.lock();
        assert_eq!(bodies[0], json!({"code": "ROOMKEY", "app_id": 0}));
    }

    #[tokio::test]
    async fn test_start_session_fatal_and_retryable_codes() {
        let fatal = json!({"code": 7010, "message": "too many", "request_id": "r2"});
        let base = serve(gateway_router(fatal, 0, Recorded::default())).await;
        let err = gateway(&base).start_session("ROOMKEY").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, OpenLiveError::Gateway { code: 7010, .. }));

        let retryable = json!({"code": 5000, "message": "busy", "request_id": "r3"});
        let base = serve(gateway_router(retryable, 0, Recorded::default())).await;
        let err = gateway(&base).start_session("ROOMKEY").await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_start_session_missing_websocket_info_is_retryable() {
        let incomplete = json!({"code": 0, "data": {"game_info": {"game_id": "g"}}});
        let base = serve(gateway_router(incomplete, 0, Recorded::default())).await;
        let err = gateway(&base).start_session("ROOMKEY").await.unwrap_err();
        assert!(matches!(err, OpenLiveError::Protocol(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_end_session_tolerates_idempotent_codes() {
        for code in [0, 7000, 7003, 4000] {
            let recorded = Recorded::default();
            let base = serve(gateway_router(start_ok(), code, recorded.clone())).await;
            let gw = gateway(&base);
            let session = gw.start_session("ROOMKEY").await.unwrap();

            assert!(gw.end_session(&session).await.is_ok());
            let bodies = recorded.end_bodies.lock();
            assert_eq!(bodies[0], json!({"app_id": 0, "game_id": "game-42"}));
        }
    }

    #[tokio::test]
    async fn test_api_base_discovery_and_fallback() {
        let discovery = Router::new().route(
            "/api/endpoints",
            get(|| async { Json(json!({"endpoints": ["https://gw.example/"]})) }),
        );
        let base = serve(discovery).await;

        let config = ListenerConfig {
            discovery_url: format!("{base}/api/endpoints"),
            ..ListenerConfig::new("ROOMKEY")
        };
        let gw = BliveGateway::new(&config).unwrap();
        assert_eq!(gw.api_base().await, "https://gw.example");

        let config = ListenerConfig {
            discovery_url: format!("{base}/missing"),
            ..ListenerConfig::new("ROOMKEY")
        };
        let gw = BliveGateway::new(&config).unwrap();
        assert_eq!(gw.api_base().await, DEFAULT_API_BASES[0]);
    }
}
