//! Route guard: decides whether a navigation may proceed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::RouteTable;
use crate::navigation::Location;
use crate::session::SessionManager;

/// What the guard knows about the session at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub logging_out: bool,
    pub roles: BTreeSet<String>,
}

/// A navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Path without the query string.
    pub path: String,
    /// Path including the query string, as it would be restored after login.
    pub full_path: String,
}

impl RouteTarget {
    pub fn new(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        let path = full_path
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        RouteTarget { path, full_path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Location),
}

/// Pure guard decision.
///
/// * Public routes are always allowed, except that a signed-in user who is
///   not logging out gets sent from login/register to the landing page.
/// * Protected routes need an authenticated session; otherwise the user goes
///   to the login page with `redirect` set to the requested path.
/// * Protected routes with roles need one of them; otherwise the user is
///   sent to the fallback page.
///
/// Paths missing from the table are treated as protected without roles.
pub fn evaluate(table: &RouteTable, target: &RouteTarget, session: &SessionSnapshot) -> GuardDecision {
    let (requires_auth, roles) = match table.find(&target.path) {
        Some(route) => (route.requires_auth, Some(&route.roles)),
        None => (true, None),
    };

    if !requires_auth {
        if session.authenticated
            && !session.logging_out
            && table.is_login_or_register(&target.path)
        {
            debug!(path = %target.path, "Already signed in; redirecting to landing page");
            return GuardDecision::Redirect(Location::new(table.landing_path.clone()));
        }
        return GuardDecision::Allow;
    }

    if !session.authenticated {
        debug!(path = %target.path, "Protected route requires sign-in");
        return GuardDecision::Redirect(
            Location::new(table.login_path.clone()).with_query("redirect", target.full_path.clone()),
        );
    }

    match roles {
        Some(roles) if !roles.is_empty() && roles.is_disjoint(&session.roles) => {
            debug!(path = %target.path, "Missing role for route; redirecting to fallback");
            GuardDecision::Redirect(Location::new(table.fallback_path.clone()))
        }
        _ => GuardDecision::Allow,
    }
}

/// Runs the guard against a live session manager.
pub struct RouteGuard {
    table: RouteTable,
    session: Arc<SessionManager>,
}

impl RouteGuard {
    pub fn new(table: RouteTable, session: Arc<SessionManager>) -> Self {
        RouteGuard { table, session }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Waits for the session to be restored, then decides.
    pub async fn before_each(&self, full_path: &str) -> GuardDecision {
        self.session.initialize().await;
        self.check(full_path)
    }

    pub fn check(&self, full_path: &str) -> GuardDecision {
        evaluate(
            &self.table,
            &RouteTarget::new(full_path),
            &self.session.snapshot(),
        )
    }
}
