use serde::{Deserialize, Serialize};

use super::user::User;
use crate::utils::jwt::expiry_from_jwt;

pub const DEFAULT_TOKEN_SCHEME: &str = "Bearer";

/// Tokens as issued by the login, register and refresh endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "tokenScheme")]
    pub token_type: Option<String>,
    /// Lifetime of the access token in milliseconds.
    #[serde(default, alias = "expiresInMs")]
    pub expires_in: Option<i64>,
}

impl TokenBundle {
    /// The access token, if present and non-blank.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    pub fn scheme(&self) -> String {
        self.token_type
            .as_deref()
            .filter(|scheme| !scheme.trim().is_empty())
            .unwrap_or(DEFAULT_TOKEN_SCHEME)
            .to_string()
    }

    /// Absolute expiry in epoch milliseconds.
    ///
    /// Uses `expiresIn` when the server sent it, then the `exp` claim of a JWT
    /// access token, and finally `now` (an immediately stale session).
    pub fn expires_at(&self, now_ms: i64) -> i64 {
        if let Some(expires_in) = self.expires_in {
            return now_ms.saturating_add(expires_in.max(0));
        }
        self.access_token()
            .and_then(expiry_from_jwt)
            .unwrap_or(now_ms)
    }
}

/// Body of a successful login or register call.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthResponse {
    #[serde(default)]
    pub tokens: Option<TokenBundle>,
    #[serde(default)]
    pub user: Option<User>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn parses_tokens_with_aliases() {
        let bundle: TokenBundle = serde_json::from_str(
            r#"{"accessToken": "a", "refreshToken": "r", "tokenScheme": "Token", "expiresInMs": 1000}"#,
        )
        .unwrap();
        assert_eq!(bundle.access_token(), Some("a"));
        assert_eq!(bundle.scheme(), "Token");
        assert_eq!(bundle.expires_at(5_000), 6_000);
    }

    #[test]
    fn blank_access_token_counts_as_missing() {
        let bundle = TokenBundle {
            access_token: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(bundle.access_token(), None);
        assert_eq!(bundle.scheme(), "Bearer");
    }

    #[test]
    fn expiry_falls_back_to_jwt_exp_claim() {
        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }
        let token = encode(
            &Header::default(),
            &Claims {
                sub: "farmer".into(),
                exp: 2_000_000_000,
            },
            &EncodingKey::from_secret(b"unknown-to-the-client"),
        )
        .unwrap();
        let bundle = TokenBundle {
            access_token: Some(token),
            ..Default::default()
        };
        assert_eq!(bundle.expires_at(1), 2_000_000_000_000);
    }

    #[test]
    fn opaque_token_without_lifetime_expires_now() {
        let bundle = TokenBundle {
            access_token: Some("opaque".into()),
            ..Default::default()
        };
        assert_eq!(bundle.expires_at(42), 42);
    }

    #[test]
    fn huge_lifetimes_saturate_instead_of_overflowing() {
        let bundle = TokenBundle {
            access_token: Some("a".into()),
            expires_in: Some(i64::MAX),
            ..Default::default()
        };
        assert_eq!(bundle.expires_at(1_700_000_000_000), i64::MAX);
    }
}
