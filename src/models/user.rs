use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The User struct represents the signed-in account as the backend reports it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl User {
    /// Construct a new User with optional roles.
    pub fn new(id: i64, username: impl Into<String>, roles: Option<Vec<String>>) -> Self {
        User {
            id,
            username: username.into(),
            nickname: None,
            email: None,
            roles: roles.unwrap_or_default().into_iter().collect(),
        }
    }

    /// Name shown in the UI: the nickname when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.is_empty() || required.iter().any(|r| self.roles.contains(r.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_user_without_roles() {
        let user: User = serde_json::from_str(
            r#"{"id": 7, "username": "farmer", "nickname": "Li", "email": "li@example.org", "enabled": true}"#,
        )
        .unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.display_name(), "Li");
        assert!(user.roles.is_empty());
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut user = User::new(1, "agronomist", None);
        assert_eq!(user.display_name(), "agronomist");
        user.nickname = Some("  ".to_string());
        assert_eq!(user.display_name(), "agronomist");
    }

    #[test]
    fn role_intersection() {
        let user = User::new(1, "a", Some(vec!["ADMIN".into(), "ANALYST".into()]));
        assert!(user.has_any_role::<&str>(&[]));
        assert!(user.has_any_role(&["FARMER", "ADMIN"]));
        assert!(!user.has_any_role(&["FARMER"]));
    }
}
