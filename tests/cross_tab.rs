mod common;

use cropyield_session::broadcast::LocalBroadcast;
use cropyield_session::guard::{evaluate, GuardDecision, RouteGuard, RouteTarget};
use cropyield_session::models::LoginRequest;
use cropyield_session::navigation::Location;
use cropyield_session::session::{SessionState, COMPETING_LOGIN_REASON};
use cropyield_session::store::{MemoryStore, SessionStore, Tier};
use cropyield_session::config::RouteTable;

use common::{open_tab, wait_for_state, FakeBackend};

#[tokio::test]
async fn a_remembered_login_elsewhere_ends_this_tab() {
    let backend = FakeBackend::new();
    let broadcast = LocalBroadcast::new();
    let profile = MemoryStore::new();
    let probe = profile.open_tab();
    let tab_a = open_tab(&backend, profile.open_tab(), &broadcast);
    let tab_b = open_tab(&backend, profile.open_tab(), &broadcast);

    tab_a
        .session
        .login(LoginRequest::new("farmer", "pw"), true)
        .await
        .unwrap();
    tab_b
        .session
        .login(LoginRequest::new("agronomist", "pw"), true)
        .await
        .unwrap();

    assert!(wait_for_state(&tab_a.session, SessionState::Anonymous).await);
    let last = tab_a.navigator.last().unwrap();
    assert_eq!(last.path, "/login");
    assert_eq!(last.query_value("reason"), Some(COMPETING_LOGIN_REASON));

    assert!(tab_b.session.is_authenticated());
    let durable = probe.get(Tier::Durable).unwrap().unwrap();
    assert_eq!(durable.user.unwrap().username, "agronomist");
}

#[tokio::test]
async fn a_login_without_remember_me_is_not_announced() {
    let backend = FakeBackend::new();
    let broadcast = LocalBroadcast::new();
    let profile = MemoryStore::new();
    let tab_a = open_tab(&backend, profile.open_tab(), &broadcast);
    let tab_b = open_tab(&backend, profile.open_tab(), &broadcast);

    tab_a
        .session
        .login(LoginRequest::new("farmer", "pw"), true)
        .await
        .unwrap();
    tab_b
        .session
        .login(LoginRequest::new("visitor", "pw"), false)
        .await
        .unwrap();

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(tab_a.session.is_authenticated());
    assert!(tab_b.session.is_authenticated());
}

#[tokio::test]
async fn a_new_tab_restores_the_remembered_session() {
    let backend = FakeBackend::new();
    let broadcast = LocalBroadcast::new();
    let profile = MemoryStore::new();
    let tab_a = open_tab(&backend, profile.open_tab(), &broadcast);
    tab_a
        .session
        .login(LoginRequest::new("farmer", "pw"), true)
        .await
        .unwrap();

    let tab_b = open_tab(&backend, profile.open_tab(), &broadcast);
    assert_eq!(tab_b.session.initialize().await, SessionState::Authenticated);
    assert_eq!(tab_b.session.user().unwrap().username, "farmer");
    assert_eq!(backend.calls_to("/api/auth/me"), 1);
    assert_ne!(tab_a.session.session_id(), tab_b.session.session_id());
}

#[tokio::test]
async fn tab_only_sessions_stay_in_their_tab() {
    let backend = FakeBackend::new();
    let broadcast = LocalBroadcast::new();
    let profile = MemoryStore::new();
    let tab_a = open_tab(&backend, profile.open_tab(), &broadcast);
    tab_a
        .session
        .login(LoginRequest::new("farmer", "pw"), false)
        .await
        .unwrap();

    let tab_b = open_tab(&backend, profile.open_tab(), &broadcast);
    assert_eq!(tab_b.session.initialize().await, SessionState::Anonymous);
    assert!(tab_a.session.is_authenticated());
}

#[tokio::test]
async fn the_guard_follows_the_live_session() {
    let backend = FakeBackend::new();
    let tab = open_tab(&backend, MemoryStore::new(), &LocalBroadcast::new());
    let guard = RouteGuard::new(RouteTable::default(), tab.session.clone());

    assert_eq!(
        guard.before_each("/settings").await,
        GuardDecision::Redirect(Location::new("/login").with_query("redirect", "/settings"))
    );

    tab.session
        .login(LoginRequest::new("farmer", "pw"), false)
        .await
        .unwrap();
    assert_eq!(guard.check("/report"), GuardDecision::Allow);
    assert_eq!(
        guard.check("/settings"),
        GuardDecision::Redirect(Location::new("/dashboard"))
    );
    assert_eq!(
        guard.check("/login"),
        GuardDecision::Redirect(Location::new("/dashboard"))
    );

    tab.session.logout();
    assert_eq!(
        evaluate(
            guard.table(),
            &RouteTarget::new("/login"),
            &tab.session.snapshot()
        ),
        GuardDecision::Allow
    );
}
