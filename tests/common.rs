#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Notify;

use cropyield_session::api::{ApiRequest, ApiResponse, HttpAuthApi, Transport};
use cropyield_session::broadcast::LocalBroadcast;
use cropyield_session::clock::ManualClock;
use cropyield_session::config::AuthEndpoints;
use cropyield_session::error::SessionResult;
use cropyield_session::gateway::RequestGateway;
use cropyield_session::navigation::HistoryNavigator;
use cropyield_session::scheduler::ManualScheduler;
use cropyield_session::session::{SessionDeps, SessionManager, SessionSettings, SessionState};
use cropyield_session::store::MemoryStore;

pub const NOW: i64 = 1_700_000_000_000;

/// What the fake backend saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub retried: bool,
}

struct BackendState {
    valid_token: Option<String>,
    issued: u32,
    refresh_ok: bool,
    expires_in: i64,
    refresh_gate: Option<Arc<Notify>>,
    log: Vec<Sent>,
}

/// An in-process stand-in for the platform API.
///
/// Only the most recently issued access token is accepted. Paths starting
/// with `/api/always-401` never accept any token.
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBackend {
            state: Mutex::new(BackendState {
                valid_token: None,
                issued: 0,
                refresh_ok: true,
                expires_in: 3_600_000,
                refresh_gate: None,
                log: Vec::new(),
            }),
        })
    }

    /// Invalidates the current access token, as if it had expired server-side.
    pub fn expire_access_token(&self) {
        self.state.lock().unwrap().valid_token = None;
    }

    pub fn reject_refresh(&self) {
        self.state.lock().unwrap().refresh_ok = false;
    }

    /// Holds every refresh call until the returned gate is notified.
    pub fn hold_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().refresh_gate = Some(gate.clone());
        gate
    }

    pub fn log(&self) -> Vec<Sent> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.log().iter().filter(|sent| sent.path == path).count()
    }

    fn issue(state: &mut BackendState) -> Value {
        state.issued += 1;
        let access = format!("access-{}", state.issued);
        state.valid_token = Some(access.clone());
        json!({
            "accessToken": access,
            "refreshToken": format!("refresh-{}", state.issued),
            "tokenType": "Bearer",
            "expiresIn": state.expires_in,
        })
    }

    fn user(username: &str) -> Value {
        let roles = if username == "admin" {
            vec!["ADMIN"]
        } else {
            vec!["USER"]
        };
        json!({"id": 1, "username": username, "roles": roles})
    }

    fn answer(&self, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        let authorized = match (&state.valid_token, request.authorization()) {
            (Some(valid), Some(sent)) => sent == format!("Bearer {}", valid),
            _ => false,
        };
        let body = request.body.clone().unwrap_or(Value::Null);

        match request.path.as_str() {
            "/api/auth/login" | "/api/auth/login/admin" | "/api/auth/register" => {
                if body["password"] == "wrong" {
                    return ApiResponse::new(
                        StatusCode::UNAUTHORIZED,
                        json!({"message": "bad credentials"}),
                    );
                }
                let username = body["username"].as_str().unwrap_or("farmer").to_string();
                let tokens = Self::issue(&mut state);
                ApiResponse::new(
                    StatusCode::OK,
                    json!({"data": {"tokens": tokens, "user": Self::user(&username)}}),
                )
            }
            "/api/auth/refresh" => {
                if !state.refresh_ok {
                    return ApiResponse::new(StatusCode::UNAUTHORIZED, Value::Null);
                }
                let tokens = Self::issue(&mut state);
                ApiResponse::new(StatusCode::OK, json!({ "data": tokens }))
            }
            "/api/auth/me" if authorized => {
                ApiResponse::new(StatusCode::OK, json!({"data": Self::user("farmer")}))
            }
            "/api/auth/logout" => ApiResponse::new(StatusCode::OK, json!({})),
            "/api/teapot" => ApiResponse::new(
                StatusCode::IM_A_TEAPOT,
                json!({"message": "short and stout"}),
            ),
            path if authorized && !path.starts_with("/api/always-401") => {
                ApiResponse::new(StatusCode::OK, json!({"data": {"path": path}}))
            }
            _ => ApiResponse::new(StatusCode::UNAUTHORIZED, Value::Null),
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        self.state.lock().unwrap().log.push(Sent {
            method: request.method.clone(),
            path: request.path.clone(),
            authorization: request.authorization().map(str::to_string),
            retried: request.is_retry(),
        });
        if request.path == "/api/auth/refresh" {
            // Let concurrent requests observe the refresh in flight.
            let gate = self.state.lock().unwrap().refresh_gate.clone();
            match gate {
                Some(gate) => gate.notified().await,
                None => tokio::task::yield_now().await,
            }
        }
        Ok(self.answer(&request))
    }
}

/// One "tab": a session manager and gateway over a shared backend.
pub struct Tab {
    pub session: Arc<SessionManager>,
    pub gateway: RequestGateway,
    pub navigator: Arc<HistoryNavigator>,
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<ManualClock>,
}

pub fn open_tab(backend: &Arc<FakeBackend>, store: MemoryStore, broadcast: &LocalBroadcast) -> Tab {
    let endpoints = AuthEndpoints::default();
    let transport: Arc<dyn Transport> = backend.clone();
    let api = Arc::new(HttpAuthApi::new(Arc::clone(&transport), endpoints.clone()));
    let navigator = Arc::new(HistoryNavigator::starting_at("/forecast"));
    let scheduler = Arc::new(ManualScheduler::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let deps = SessionDeps::new(api, Arc::new(store))
        .with_clock(clock.clone())
        .with_scheduler(scheduler.clone())
        .with_broadcast(Arc::new(broadcast.clone()))
        .with_navigator(navigator.clone());
    let session = SessionManager::new(SessionSettings::default(), deps);
    let gateway = RequestGateway::new(transport, Arc::clone(&session), endpoints);
    Tab {
        session,
        gateway,
        navigator,
        scheduler,
        clock,
    }
}

/// Lets spawned tasks (the cross-tab listener) run until `state` is reached.
pub async fn wait_for_state(session: &SessionManager, state: SessionState) -> bool {
    for _ in 0..100 {
        if session.state() == state {
            return true;
        }
        tokio::task::yield_now().await;
    }
    session.state() == state
}
