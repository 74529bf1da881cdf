use std::sync::{Arc, Mutex, MutexGuard};

use super::base::{decode, encode, SessionStore, Tier};
use crate::error::{SessionError, SessionResult};
use crate::models::PersistedSession;

/// A store that keeps both tiers in memory.
///
/// Records are kept serialized, exactly as a browser's storage would hold
/// them. Handles created with [`MemoryStore::open_tab`] share the durable
/// slot and own a fresh tab slot, which is how several tabs of one profile
/// are modelled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    durable: Arc<Mutex<Option<String>>>,
    tab: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle sharing this store's durable tier, with an empty tab tier.
    pub fn open_tab(&self) -> Self {
        MemoryStore {
            durable: Arc::clone(&self.durable),
            tab: Mutex::new(None),
        }
    }

    fn slot(&self, tier: Tier) -> SessionResult<MutexGuard<'_, Option<String>>> {
        let slot = match tier {
            Tier::Durable => self.durable.as_ref(),
            Tier::Tab => &self.tab,
        };
        slot.lock()
            .map_err(|_| SessionError::Storage(format!("{} tier lock poisoned", tier.as_str())))
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, tier: Tier) -> SessionResult<Option<PersistedSession>> {
        Ok(self.slot(tier)?.as_deref().and_then(decode))
    }

    fn set(&self, tier: Tier, session: &PersistedSession) -> SessionResult<()> {
        let raw = encode(session)?;
        *self.slot(tier)? = Some(raw);
        Ok(())
    }

    fn clear(&self, tier: Tier) -> SessionResult<()> {
        self.slot(tier)?.take();
        Ok(())
    }
}
