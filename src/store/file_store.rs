use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::base::{decode, encode, SessionStore, Tier};
use crate::error::{SessionError, SessionResult};
use crate::models::PersistedSession;

/// A store whose durable tier is a JSON file shared by every process that
/// points at the same directory. The tab tier stays in process memory.
#[derive(Debug)]
pub struct FileStore {
    durable_path: PathBuf,
    tab: Mutex<Option<String>>,
}

impl FileStore {
    /// Opens (and creates, if needed) `directory`; the durable record is
    /// `<directory>/<key>.json`.
    pub fn new(directory: impl AsRef<Path>, key: &str) -> SessionResult<Self> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|e| {
            SessionError::Storage(format!(
                "Cannot create session directory '{}': {}",
                directory.display(),
                e
            ))
        })?;
        Ok(FileStore {
            durable_path: directory.join(format!("{}.json", key)),
            tab: Mutex::new(None),
        })
    }

    pub fn durable_path(&self) -> &Path {
        &self.durable_path
    }

    fn storage_error(&self, action: &str, e: std::io::Error) -> SessionError {
        SessionError::Storage(format!(
            "Failed to {} '{}': {}",
            action,
            self.durable_path.display(),
            e
        ))
    }

    fn tab_slot(&self) -> SessionResult<std::sync::MutexGuard<'_, Option<String>>> {
        self.tab
            .lock()
            .map_err(|_| SessionError::Storage("tab tier lock poisoned".into()))
    }
}

impl SessionStore for FileStore {
    fn get(&self, tier: Tier) -> SessionResult<Option<PersistedSession>> {
        match tier {
            Tier::Tab => Ok(self.tab_slot()?.as_deref().and_then(decode)),
            Tier::Durable => match fs::read_to_string(&self.durable_path) {
                Ok(raw) => Ok(decode(&raw)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(self.storage_error("read", e)),
            },
        }
    }

    fn set(&self, tier: Tier, session: &PersistedSession) -> SessionResult<()> {
        let raw = encode(session)?;
        match tier {
            Tier::Tab => {
                *self.tab_slot()? = Some(raw);
                Ok(())
            }
            Tier::Durable => {
                // Write-then-rename so a concurrent reader never sees half a record.
                let staging = self.durable_path.with_extension("json.tmp");
                fs::write(&staging, raw).map_err(|e| self.storage_error("write", e))?;
                fs::rename(&staging, &self.durable_path)
                    .map_err(|e| self.storage_error("replace", e))?;
                debug!("Wrote durable session to '{}'", self.durable_path.display());
                Ok(())
            }
        }
    }

    fn clear(&self, tier: Tier) -> SessionResult<()> {
        match tier {
            Tier::Tab => {
                self.tab_slot()?.take();
                Ok(())
            }
            Tier::Durable => match fs::remove_file(&self.durable_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.storage_error("remove", e)),
            },
        }
    }
}
