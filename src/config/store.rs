use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The session store backends. We differentiate them via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Both tiers live in process memory; nothing survives a restart.
    #[serde(rename = "memory")]
    Memory,
    /// The durable tier is a JSON file inside `directory`, shared by every
    /// process pointed at the same directory.
    #[serde(rename = "file")]
    File(FileStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
pub struct FileStoreConfig {
    pub directory: String,
}
