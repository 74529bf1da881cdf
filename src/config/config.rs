use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::routes::RouteTable;
use super::store::StoreConfig;
use crate::error::{SessionError, SessionResult};

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, Default)]
pub struct ConfigV1 {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub routes: RouteTable,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the backend lives and how long we wait for it.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    #[serde(default)]
    pub endpoints: AuthEndpoints,
}

fn default_timeout_in_ms() -> u64 {
    120_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:8080".to_string(),
            timeout_in_ms: default_timeout_in_ms(),
            endpoints: AuthEndpoints::default(),
        }
    }
}

/// Paths of the authentication API, relative to `ApiConfig::base_url`.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
pub struct AuthEndpoints {
    #[serde(default = "default_login")]
    pub login: String,
    #[serde(default = "default_login_admin")]
    pub login_admin: String,
    #[serde(default = "default_login_user")]
    pub login_user: String,
    #[serde(default = "default_register")]
    pub register: String,
    #[serde(default = "default_refresh")]
    pub refresh: String,
    #[serde(default = "default_me")]
    pub me: String,
    #[serde(default = "default_logout")]
    pub logout: String,
}

fn default_login() -> String {
    "/api/auth/login".to_string()
}
fn default_login_admin() -> String {
    "/api/auth/login/admin".to_string()
}
fn default_login_user() -> String {
    "/api/auth/login/user".to_string()
}
fn default_register() -> String {
    "/api/auth/register".to_string()
}
fn default_refresh() -> String {
    "/api/auth/refresh".to_string()
}
fn default_me() -> String {
    "/api/auth/me".to_string()
}
fn default_logout() -> String {
    "/api/auth/logout".to_string()
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        AuthEndpoints {
            login: default_login(),
            login_admin: default_login_admin(),
            login_user: default_login_user(),
            register: default_register(),
            refresh: default_refresh(),
            me: default_me(),
            logout: default_logout(),
        }
    }
}

impl AuthEndpoints {
    /// Endpoints whose 401 means the credentials themselves are bad, so they
    /// must never trigger a refresh.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        [
            &self.login,
            &self.login_admin,
            &self.login_user,
            &self.register,
            &self.refresh,
        ]
        .iter()
        .any(|endpoint| path == endpoint.as_str())
    }
}

/// Timing knobs for the session lifecycle.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long before expiry the proactive refresh fires.
    #[serde(default = "default_refresh_lead_ms")]
    pub refresh_lead_ms: i64,
    /// Lower bound on the proactive refresh delay.
    #[serde(default = "default_min_refresh_delay_ms")]
    pub min_refresh_delay_ms: i64,
    /// Name under which the session is persisted in each tier.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_refresh_lead_ms() -> i64 {
    60_000
}

fn default_min_refresh_delay_ms() -> i64 {
    10_000
}

fn default_storage_key() -> String {
    "cropyield-auth".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            refresh_lead_ms: default_refresh_lead_ms(),
            min_refresh_delay_ms: default_min_refresh_delay_ms(),
            storage_key: default_storage_key(),
        }
    }
}

/// Builds the figment used by `load_config`: the YAML file, overridden by
/// `CROPYIELD_`-prefixed environment variables (`CROPYIELD_API__BASE_URL`).
pub fn figment(path: impl AsRef<Path>) -> Figment {
    Figment::new()
        .merge(Yaml::file(path.as_ref()))
        .merge(Env::prefixed("CROPYIELD_").split("__"))
}

/// Load config from a YAML file (usually "./config.yaml") plus environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> SessionResult<ConfigV1> {
    extract(figment(path))
}

/// Extracts a versioned config from an already assembled figment.
pub fn extract(figment: Figment) -> SessionResult<ConfigV1> {
    let config = figment
        .extract::<Config>()
        .map_err(|e| SessionError::Config(e.to_string()))?;
    match config {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> SessionResult<()> {
    let schema = schema_for!(Config);
    let rendered =
        serde_json::to_string_pretty(&schema).map_err(|e| SessionError::Config(e.to_string()))?;
    println!("{}", rendered);
    Ok(())
}
