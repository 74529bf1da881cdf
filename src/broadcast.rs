//! Cross-tab announcement of newly signed-in sessions.
//!
//! Tabs of one browser profile share storage, so a login in one tab silently
//! replaces the credentials another tab relies on. Each login announces the
//! tab's session id here; every other authenticated tab sees a foreign id
//! and signs itself out.

use tokio::sync::broadcast;
use tracing::debug;

pub trait SessionBroadcast: Send + Sync {
    fn announce(&self, session_id: &str);
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-process channel shared by cloning. Every clone is one more "tab".
///
/// Managers in other processes never hear these announcements, even when
/// they share a `FileStore`.
#[derive(Debug, Clone)]
pub struct LocalBroadcast {
    sender: broadcast::Sender<String>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        LocalBroadcast { sender }
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroadcast for LocalBroadcast {
    fn announce(&self, session_id: &str) {
        // No subscribers simply means no other tab is listening.
        match self.sender.send(session_id.to_string()) {
            Ok(receivers) => debug!(session_id, receivers, "Announced session"),
            Err(_) => debug!(session_id, "Announced session with no listeners"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}
