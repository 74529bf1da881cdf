pub mod credentials;
pub mod session;
pub mod token;
pub mod user;

pub use credentials::{LoginMode, LoginRequest, RegisterRequest};
pub use session::{PersistedSession, Session};
pub use token::{AuthResponse, TokenBundle, DEFAULT_TOKEN_SCHEME};
pub use user::User;
