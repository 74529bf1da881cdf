//! Request gateway: attaches credentials to outgoing calls and recovers from
//! expired access tokens with a single shared refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use http::header::AUTHORIZATION;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, Transport};
use crate::config::AuthEndpoints;
use crate::error::{SessionError, SessionResult};
use crate::session::{SessionManager, CREDENTIALS_REJECTED_REASON};

type Reply = oneshot::Sender<SessionResult<ApiResponse>>;

/// A request parked until the in-flight refresh settles.
struct Waiter {
    seq: u64,
    request: ApiRequest,
    reply: Reply,
}

enum Role {
    Leader(ApiRequest),
    Follower(oneshot::Receiver<SessionResult<ApiResponse>>),
}

#[derive(Default)]
struct RefreshQueue {
    refreshing: bool,
    waiters: Vec<Waiter>,
}

/// Held by the request that leads a refresh. If the leader is dropped before
/// settling the queue, parked requests fail with `Interrupted`.
struct RefreshLeader<'a> {
    queue: &'a Mutex<RefreshQueue>,
    settled: bool,
}

impl RefreshLeader<'_> {
    fn settle(mut self) -> Vec<Waiter> {
        self.settled = true;
        let mut queue = lock(self.queue);
        queue.refreshing = false;
        std::mem::take(&mut queue.waiters)
    }
}

impl Drop for RefreshLeader<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = {
            let mut queue = lock(self.queue);
            queue.refreshing = false;
            std::mem::take(&mut queue.waiters)
        };
        for waiter in waiters {
            let _ = waiter.reply.send(Err(SessionError::Interrupted));
        }
    }
}

fn lock(queue: &Mutex<RefreshQueue>) -> MutexGuard<'_, RefreshQueue> {
    match queue.lock() {
        Ok(queue) => queue,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    endpoints: AuthEndpoints,
    queue: Mutex<RefreshQueue>,
    next_seq: AtomicU64,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionManager>,
        endpoints: AuthEndpoints,
    ) -> Self {
        RequestGateway {
            transport,
            session,
            endpoints,
            queue: Mutex::new(RefreshQueue::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Sends `request` with the session's credentials.
    ///
    /// A 401 on a non-auth endpoint triggers one refresh shared by every
    /// request that hits a 401 meanwhile; afterwards each of them is retried
    /// once, in the order they were originally sent.
    pub async fn send(&self, mut request: ApiRequest) -> SessionResult<ApiResponse> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if request.authorization().is_none() {
            if let Some(authorization) = self.session.authorization_header() {
                request.set_authorization(&authorization);
            }
        }

        let response = self.transport.send(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return response.error_for_status(&request.path);
        }
        self.recover_unauthorized(seq, request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.send(ApiRequest::get(path)).await?.data()
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: Value) -> SessionResult<T> {
        self.send(ApiRequest::post(path, body)).await?.data()
    }

    async fn recover_unauthorized(
        &self,
        seq: u64,
        request: ApiRequest,
    ) -> SessionResult<ApiResponse> {
        let unauthorized = SessionError::Unauthorized {
            endpoint: request.path.clone(),
        };

        if self.endpoints.is_auth_endpoint(&request.path) {
            warn!(endpoint = %request.path, "Authentication endpoint answered 401");
            self.session.force_logout(CREDENTIALS_REJECTED_REASON);
            return Err(unauthorized);
        }
        if request.is_retry() || !self.session.has_refresh_token() {
            debug!(endpoint = %request.path, "401 is final for this request");
            return Err(unauthorized);
        }

        let role = {
            let mut queue = lock(&self.queue);
            if queue.refreshing {
                let (reply, parked) = oneshot::channel();
                queue.waiters.push(Waiter {
                    seq,
                    request,
                    reply,
                });
                Role::Follower(parked)
            } else {
                queue.refreshing = true;
                Role::Leader(request)
            }
        };
        match role {
            Role::Follower(parked) => {
                debug!(seq, "Waiting for the in-flight token refresh");
                parked.await.unwrap_or(Err(SessionError::Interrupted))
            }
            Role::Leader(request) => self.refresh_and_replay(seq, request).await,
        }
    }

    async fn refresh_and_replay(
        &self,
        seq: u64,
        request: ApiRequest,
    ) -> SessionResult<ApiResponse> {
        let leader = RefreshLeader {
            queue: &self.queue,
            settled: false,
        };
        let refreshed = self.session.refresh().await;
        let waiters = leader.settle();

        if let Err(e) = refreshed {
            warn!("Token refresh failed; rejecting {} queued request(s): {}", waiters.len(), e);
            for waiter in waiters {
                let _ = waiter.reply.send(Err(e.clone()));
            }
            if e != SessionError::SessionChanged {
                self.session
                    .force_logout(&format!("Your session has expired: {}", e));
            }
            return Err(e);
        }

        info!("Token refreshed; replaying {} request(s)", waiters.len() + 1);
        let mut replays: Vec<(u64, ApiRequest, Option<Reply>)> = waiters
            .into_iter()
            .map(|waiter| (waiter.seq, waiter.request, Some(waiter.reply)))
            .collect();
        replays.push((seq, request, None));
        replays.sort_by_key(|(seq, _, _)| *seq);

        let gateway = self;
        let results = join_all(replays.into_iter().map(move |(_, request, reply)| async move {
            let result = gateway.replay(request).await;
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                    None
                }
                None => Some(result),
            }
        }))
        .await;

        results
            .into_iter()
            .flatten()
            .next()
            .unwrap_or(Err(SessionError::Interrupted))
    }

    async fn replay(&self, mut request: ApiRequest) -> SessionResult<ApiResponse> {
        request.retried = true;
        match self.session.authorization_header() {
            Some(authorization) => request.set_authorization(&authorization),
            None => {
                request.headers.remove(AUTHORIZATION);
            }
        }
        let endpoint = request.path.clone();
        self.transport
            .send(request)
            .await?
            .error_for_status(&endpoint)
    }
}
