//! HTTP plumbing: the transport seam and the authentication API client.

pub mod auth_api;
pub mod transport;

pub use auth_api::{AuthApi, HttpAuthApi};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
