use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::transport::{ApiRequest, Transport};
use crate::config::AuthEndpoints;
use crate::error::{SessionError, SessionResult};
use crate::models::{AuthResponse, LoginMode, LoginRequest, RegisterRequest, TokenBundle, User};

/// The authentication API the session manager talks to.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &LoginRequest) -> SessionResult<AuthResponse>;
    async fn register(&self, details: &RegisterRequest) -> SessionResult<AuthResponse>;
    async fn refresh(&self, refresh_token: &str) -> SessionResult<TokenBundle>;
    async fn me(&self, authorization: &str) -> SessionResult<User>;
    async fn logout(&self, authorization: &str) -> SessionResult<()>;
}

/// `AuthApi` over HTTP, unwrapping the backend's `{ "data": ... }` envelope.
pub struct HttpAuthApi {
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
}

impl HttpAuthApi {
    pub fn new(transport: Arc<dyn Transport>, endpoints: AuthEndpoints) -> Self {
        HttpAuthApi {
            transport,
            endpoints,
        }
    }

    fn login_endpoint(&self, mode: LoginMode) -> &str {
        match mode {
            LoginMode::Default => self.endpoints.login.as_str(),
            LoginMode::Admin => self.endpoints.login_admin.as_str(),
            LoginMode::User => self.endpoints.login_user.as_str(),
        }
    }

    async fn call(&self, request: ApiRequest) -> SessionResult<super::ApiResponse> {
        let endpoint = request.path.clone();
        self.transport
            .send(request)
            .await?
            .error_for_status(&endpoint)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &LoginRequest) -> SessionResult<AuthResponse> {
        let endpoint = self.login_endpoint(credentials.mode).to_string();
        info!("Signing in '{}' via {}", credentials.username, endpoint);
        let body = serde_json::to_value(credentials)
            .map_err(|e| SessionError::IncompleteResponse(e.to_string()))?;
        self.call(ApiRequest::post(endpoint, body)).await?.data()
    }

    async fn register(&self, details: &RegisterRequest) -> SessionResult<AuthResponse> {
        info!("Registering '{}'", details.username);
        let body = serde_json::to_value(details)
            .map_err(|e| SessionError::IncompleteResponse(e.to_string()))?;
        self.call(ApiRequest::post(self.endpoints.register.clone(), body))
            .await?
            .data()
    }

    async fn refresh(&self, refresh_token: &str) -> SessionResult<TokenBundle> {
        debug!("Requesting a new access token");
        self.call(ApiRequest::post(
            self.endpoints.refresh.clone(),
            json!({ "refreshToken": refresh_token }),
        ))
        .await?
        .data()
    }

    async fn me(&self, authorization: &str) -> SessionResult<User> {
        let response = self
            .call(ApiRequest::get(self.endpoints.me.clone()).with_authorization(authorization))
            .await?;
        if response.payload().is_null() {
            return Err(SessionError::IncompleteResponse(
                "profile response carried no user".into(),
            ));
        }
        response.data()
    }

    async fn logout(&self, authorization: &str) -> SessionResult<()> {
        self.call(
            ApiRequest::post(self.endpoints.logout.clone(), json!({}))
                .with_authorization(authorization),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ReqwestTransport;
    use crate::config::ApiConfig;
    use mockito::{Matcher, Server};

    fn api(server: &Server) -> HttpAuthApi {
        let config = ApiConfig {
            base_url: server.url(),
            timeout_in_ms: 2_000,
            endpoints: AuthEndpoints::default(),
        };
        HttpAuthApi::new(
            Arc::new(ReqwestTransport::new(&config).unwrap()),
            config.endpoints,
        )
    }

    #[tokio::test]
    async fn login_unwraps_the_envelope() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/auth/login/admin")
            .match_body(Matcher::Json(
                json!({"username": "root", "password": "pw"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":0,"data":{"tokens":{"accessToken":"a","refreshToken":"r","tokenType":"Bearer","expiresIn":3600000},"user":{"id":1,"username":"root","roles":["ADMIN"]}}}"#,
            )
            .create_async()
            .await;

        let response = api(&server)
            .login(&LoginRequest::new("root", "pw").with_mode(LoginMode::Admin))
            .await
            .unwrap();
        m.assert_async().await;

        let tokens = response.tokens.unwrap();
        assert_eq!(tokens.access_token(), Some("a"));
        assert_eq!(tokens.expires_in, Some(3_600_000));
        assert!(response.user.unwrap().roles.contains("ADMIN"));
    }

    #[tokio::test]
    async fn refresh_posts_the_refresh_token() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/auth/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "r1"})))
            .with_status(200)
            .with_body(r#"{"data":{"accessToken":"a2","refreshToken":"r2","expiresIn":1000}}"#)
            .create_async()
            .await;

        let tokens = api(&server).refresh("r1").await.unwrap();
        m.assert_async().await;
        assert_eq!(tokens.access_token(), Some("a2"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn rejected_login_is_unauthorized() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/login")
            .with_status(401)
            .with_body(r#"{"message":"bad credentials"}"#)
            .create_async()
            .await;

        let err = api(&server)
            .login(&LoginRequest::new("x", "y"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Unauthorized {
                endpoint: "/api/auth/login".into()
            }
        );
    }

    #[tokio::test]
    async fn me_sends_authorization_and_requires_a_user() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"data":null}"#)
            .create_async()
            .await;

        let err = api(&server).me("Bearer tok").await.unwrap_err();
        m.assert_async().await;
        assert!(matches!(err, SessionError::IncompleteResponse(_)));
    }

    #[tokio::test]
    async fn logout_reports_server_errors() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/logout")
            .with_status(500)
            .create_async()
            .await;

        let err = api(&server).logout("Bearer tok").await.unwrap_err();
        assert!(matches!(err, SessionError::Status { .. }));
    }
}
