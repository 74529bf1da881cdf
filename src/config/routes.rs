use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One navigable route and the access it demands.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
pub struct RouteDefinition {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_requires_auth")]
    pub requires_auth: bool,
    /// Any one of these roles grants access. Empty means "any authenticated user".
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

fn default_requires_auth() -> bool {
    true
}

impl RouteDefinition {
    pub fn public(path: &str) -> Self {
        RouteDefinition {
            path: path.to_string(),
            name: None,
            requires_auth: false,
            roles: BTreeSet::new(),
        }
    }

    pub fn protected(path: &str, roles: &[&str]) -> Self {
        RouteDefinition {
            path: path.to_string(),
            name: None,
            requires_auth: true,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// The role-gated route table consumed by the route guard.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
pub struct RouteTable {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_register_path")]
    pub register_path: String,
    /// Where an authenticated user lands when visiting login/register.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Soft redirect target for role mismatches.
    #[serde(default = "default_landing_path")]
    pub fallback_path: String,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteDefinition>,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_register_path() -> String {
    "/register".to_string()
}

fn default_landing_path() -> String {
    "/dashboard".to_string()
}

fn default_routes() -> Vec<RouteDefinition> {
    vec![
        RouteDefinition::public("/login"),
        RouteDefinition::public("/register"),
        RouteDefinition::protected("/dashboard", &[]),
        RouteDefinition::protected("/data", &[]),
        RouteDefinition::protected("/forecast", &[]),
        RouteDefinition::protected("/report", &[]),
        RouteDefinition::protected("/consultation", &[]),
        RouteDefinition::protected("/settings", &["ADMIN"]),
        RouteDefinition::protected("/login-logs", &["ADMIN"]),
    ]
}

impl Default for RouteTable {
    fn default() -> Self {
        RouteTable {
            login_path: default_login_path(),
            register_path: default_register_path(),
            landing_path: default_landing_path(),
            fallback_path: default_landing_path(),
            routes: default_routes(),
        }
    }
}

impl RouteTable {
    /// Looks up the route for a path, ignoring any query string and trailing slash.
    pub fn find(&self, path: &str) -> Option<&RouteDefinition> {
        let path = route_path(path);
        self.routes.iter().find(|route| route.path == path)
    }

    pub fn is_login_or_register(&self, path: &str) -> bool {
        let path = route_path(path);
        path == self.login_path || path == self.register_path
    }
}

/// `path` without its query string and trailing slash.
fn route_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_query_and_trailing_slash() {
        let table = RouteTable::default();
        assert_eq!(table.find("/settings/?tab=users").unwrap().path, "/settings");
        assert!(table.is_login_or_register("/login/"));
        assert!(table.is_login_or_register("/register/?invite=1"));
        assert!(!table.is_login_or_register("/"));
    }
}
