use serde::{Deserialize, Serialize};

use super::token::{TokenBundle, DEFAULT_TOKEN_SCHEME};
use super::user::User;
use crate::error::{SessionError, SessionResult};

/// In-memory session state of one tab/process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub token_scheme: String,
    pub refresh_token: Option<String>,
    /// Epoch milliseconds; 0 means "no session".
    pub expires_at: i64,
    pub remember_me: bool,
    pub user: Option<User>,
    /// Random per-process identifier. Never persisted.
    pub session_id: String,
}

/// The serialized form written to a persistence tier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(alias = "token")]
    pub access_token: Option<String>,
    #[serde(default = "default_scheme", alias = "tokenType")]
    pub token_scheme: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_scheme() -> String {
    DEFAULT_TOKEN_SCHEME.to_string()
}

impl PersistedSession {
    /// True when the record still carries a token that has not expired at `now_ms`.
    pub fn is_usable(&self, now_ms: i64) -> bool {
        self.access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
            && self.expires_at > now_ms
    }
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Session {
            access_token: None,
            token_scheme: DEFAULT_TOKEN_SCHEME.to_string(),
            refresh_token: None,
            expires_at: 0,
            remember_me: false,
            user: None,
            session_id: session_id.into(),
        }
    }

    pub fn is_authenticated(&self, now_ms: i64) -> bool {
        self.access_token.is_some() && now_ms < self.expires_at
    }

    /// `"<scheme> <token>"`, whenever a token is held.
    pub fn authorization_header(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("{} {}", self.token_scheme, token))
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.user.iter().flat_map(|user| user.roles.iter())
    }

    /// Zeroes every field except the session id.
    pub fn clear(&mut self) {
        *self = Session::new(std::mem::take(&mut self.session_id));
    }

    /// Installs freshly issued tokens. Nothing is touched when the bundle
    /// has no access token.
    ///
    /// A bundle without a refresh token keeps the one already held.
    pub fn apply_tokens(&mut self, tokens: &TokenBundle, now_ms: i64) -> SessionResult<String> {
        let access_token = tokens
            .access_token()
            .ok_or_else(|| SessionError::IncompleteResponse("missing tokens.accessToken".into()))?
            .to_string();

        self.token_scheme = tokens.scheme();
        if let Some(refresh) = tokens.refresh_token.as_ref().filter(|r| !r.is_empty()) {
            self.refresh_token = Some(refresh.clone());
        }
        // Keep `access_token present <=> expires_at > 0` even for a bundle
        // that expires at the epoch.
        self.expires_at = tokens.expires_at(now_ms).max(1);
        self.access_token = Some(access_token.clone());
        Ok(access_token)
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            access_token: self.access_token.clone(),
            token_scheme: self.token_scheme.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            remember_me: self.remember_me,
            user: self.user.clone(),
        }
    }

    pub fn adopt(&mut self, stored: PersistedSession) {
        self.access_token = stored.access_token;
        self.token_scheme = if stored.token_scheme.is_empty() {
            default_scheme()
        } else {
            stored.token_scheme
        };
        self.refresh_token = stored.refresh_token;
        self.expires_at = stored.expires_at;
        self.remember_me = stored.remember_me;
        self.user = stored.user;
    }
}
