//! The session manager: login, registration, token refresh, logout and
//! cross-tab invalidation for one tab/process.

pub mod manager;

pub use manager::{
    refresh_delay, SessionDeps, SessionManager, SessionSettings, SessionState,
    COMPETING_LOGIN_REASON, CREDENTIALS_REJECTED_REASON,
};
