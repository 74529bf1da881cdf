use serde::{Deserialize, Serialize};

/// Which login endpoint a sign-in goes to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    #[default]
    Default,
    Admin,
    User,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Not sent to the server; only picks the endpoint.
    #[serde(skip)]
    pub mode: LoginMode,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        LoginRequest {
            username: username.into().trim().to_string(),
            password: password.into(),
            mode: LoginMode::Default,
        }
    }

    pub fn with_mode(mut self, mode: LoginMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_mode_is_not_serialized() {
        let request = LoginRequest::new("  farmer ", "pw").with_mode(LoginMode::Admin);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"username": "farmer", "password": "pw"}));
    }
}
