//! Arena definition file

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::ArenaDefinition;

/// One arena as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArena {
    #[serde(flatten)]
    pub definition: ArenaDefinition,
    /// Compressed terrain snapshot tokens
    #[serde(default)]
    pub terrain: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArenaFile<T> {
    #[serde(default = "BTreeMap::new")]
    arenas: BTreeMap<String, T>,
}

/// Contents of the arena file, entry by entry
#[derive(Debug, Default)]
pub struct LoadedArenas {
    pub arenas: BTreeMap<String, StoredArena>,
    /// Entries that did not parse, kept verbatim so a later save keeps them
    pub unreadable: BTreeMap<String, Value>,
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("arena file I/O: {0}")]
    Io(#[from] io::Error),

    #[error("arena file format: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON file keyed by arena name
#[derive(Debug, Clone)]
pub struct ArenaStore {
    path: PathBuf,
}

impl ArenaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all arenas. A missing file is an empty store. An entry that does
    /// not parse is logged and set aside without affecting the others.
    pub fn load(&self) -> Result<LoadedArenas, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadedArenas::default()),
            Err(e) => return Err(e.into()),
        };
        let file: ArenaFile<Value> = serde_json::from_str(&raw)?;

        let mut loaded = LoadedArenas::default();
        for (name, value) in file.arenas {
            match StoredArena::deserialize(&value) {
                Ok(arena) => {
                    loaded.arenas.insert(name, arena);
                }
                Err(e) => {
                    warn!(arena = %name, error = %e, "Skipping unreadable arena entry");
                    loaded.unreadable.insert(name, value);
                }
            }
        }
        Ok(loaded)
    }

    /// Replace the file contents atomically (write then rename). Entries in
    /// `unreadable` are written back unchanged unless an arena now has the
    /// same name.
    pub fn save(
        &self,
        arenas: BTreeMap<String, StoredArena>,
        unreadable: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        let mut entries: BTreeMap<String, Value> = unreadable
            .iter()
            .filter(|(name, _)| !arenas.keys().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        for (name, arena) in arenas {
            entries.insert(name, serde_json::to_value(arena)?);
        }

        let json = serde_json::to_string_pretty(&ArenaFile { arenas: entries })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Move an unreadable file aside so the next save cannot overwrite it.
    /// Returns where it went.
    pub fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let aside = self.path.with_extension("json.bak");
        std::fs::rename(&self.path, &aside)?;
        Ok(aside)
    }
}
