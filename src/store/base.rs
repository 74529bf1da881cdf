use std::sync::Arc;

use tracing::{debug, info};

use super::{file_store::FileStore, memory_store::MemoryStore};
use crate::config::StoreConfig;
use crate::error::{SessionError, SessionResult};
use crate::models::PersistedSession;

/// Persistence tiers of a browser profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Survives restarts and is shared by every tab of the profile ("remember me").
    Durable,
    /// Lives as long as the tab/process.
    Tab,
}

impl Tier {
    pub fn for_remember_me(remember_me: bool) -> Self {
        if remember_me {
            Tier::Durable
        } else {
            Tier::Tab
        }
    }

    pub fn other(self) -> Self {
        match self {
            Tier::Durable => Tier::Tab,
            Tier::Tab => Tier::Durable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Durable => "durable",
            Tier::Tab => "tab",
        }
    }
}

/// The SessionStore trait abstracts the key-value storage that holds the
/// serialized session, one slot per tier.
pub trait SessionStore: Send + Sync {
    fn get(&self, tier: Tier) -> SessionResult<Option<PersistedSession>>;
    fn set(&self, tier: Tier, session: &PersistedSession) -> SessionResult<()>;
    fn clear(&self, tier: Tier) -> SessionResult<()>;
}

/// Writes `session` into the tier chosen by its `remember_me` flag and clears
/// the other one, so at most one tier ever holds a session.
pub fn persist(store: &dyn SessionStore, session: &PersistedSession) -> SessionResult<()> {
    let tier = Tier::for_remember_me(session.remember_me);
    store.set(tier, session)?;
    store.clear(tier.other())?;
    debug!("Persisted session to the {} tier", tier.as_str());
    Ok(())
}

/// Reads the persisted session, preferring the tab tier.
pub fn load(store: &dyn SessionStore) -> SessionResult<Option<PersistedSession>> {
    if let Some(session) = store.get(Tier::Tab)? {
        return Ok(Some(session));
    }
    store.get(Tier::Durable)
}

/// Clears both tiers, attempting both even if the first one fails.
pub fn clear_all(store: &dyn SessionStore) -> SessionResult<()> {
    let tab = store.clear(Tier::Tab);
    let durable = store.clear(Tier::Durable);
    tab.and(durable)
}

pub(crate) fn encode(session: &PersistedSession) -> SessionResult<String> {
    serde_json::to_string(session).map_err(|e| SessionError::Storage(e.to_string()))
}

/// Corrupt records read as absent rather than failing the caller.
pub(crate) fn decode(raw: &str) -> Option<PersistedSession> {
    match serde_json::from_str(raw) {
        Ok(session) => Some(session),
        Err(e) => {
            debug!("Ignoring unreadable persisted session: {}", e);
            None
        }
    }
}

/// Creates a concrete store implementation based on the StoreConfig.
pub fn create_store(config: &StoreConfig, key: &str) -> SessionResult<Arc<dyn SessionStore>> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory session store.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::File(file_config) => {
            let store = FileStore::new(&file_config.directory, key)?;
            info!(
                "Using file session store at '{}'.",
                store.durable_path().display()
            );
            Ok(Arc::new(store))
        }
    }
}
