//! Kits and per-mode match rules

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// How a fight under a kit plays out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Regular fight to the death
    #[default]
    Standard,
    /// Knock the opponent off the platform; no damage
    Sumo,
    /// First to a hit count; no damage
    Boxing,
    /// Players may place and break blocks
    Build,
}

/// Win condition consumed by the combat collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WinCondition {
    LastStanding,
    KnockOff,
    Hits(u32),
}

/// Behaviour table for a [`MatchMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeRules {
    /// Freeze horizontal movement while the countdown runs
    pub lock_movement_in_countdown: bool,
    /// Cancel damage so health never drops
    pub bypass_damage: bool,
    pub win_condition: WinCondition,
    /// Placed blocks would leak into other fights, so only single-lease
    /// arenas qualify
    pub needs_exclusive_arena: bool,
}

impl MatchMode {
    pub const fn rules(self) -> ModeRules {
        match self {
            MatchMode::Standard => ModeRules {
                lock_movement_in_countdown: false,
                bypass_damage: false,
                win_condition: WinCondition::LastStanding,
                needs_exclusive_arena: false,
            },
            MatchMode::Sumo => ModeRules {
                lock_movement_in_countdown: true,
                bypass_damage: true,
                win_condition: WinCondition::KnockOff,
                needs_exclusive_arena: false,
            },
            MatchMode::Boxing => ModeRules {
                lock_movement_in_countdown: false,
                bypass_damage: true,
                win_condition: WinCondition::Hits(100),
                needs_exclusive_arena: false,
            },
            MatchMode::Build => ModeRules {
                lock_movement_in_countdown: false,
                bypass_damage: false,
                win_condition: WinCondition::LastStanding,
                needs_exclusive_arena: true,
            },
        }
    }
}

fn default_true() -> bool {
    true
}

/// A named loadout plus its mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kit {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the ranked queue is offered for this kit
    #[serde(default = "default_true")]
    pub ranked: bool,
    #[serde(default)]
    pub mode: MatchMode,
    /// Item identifiers handed to the loadout applier
    #[serde(default)]
    pub loadout: Vec<String>,
}

impl Kit {
    pub fn new(name: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            ranked: true,
            mode,
            loadout: Vec::new(),
        }
    }

    pub fn rules(&self) -> ModeRules {
        self.mode.rules()
    }

    pub fn is_build_mode(&self) -> bool {
        self.mode == MatchMode::Build
    }
}

/// Kit loading errors
#[derive(Debug, thiserror::Error)]
pub enum KitError {
    #[error("Failed to read kit file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid kit file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Case-insensitive kit lookup
#[derive(Default)]
pub struct KitRegistry {
    kits: DashMap<String, Arc<Kit>>,
}

impl KitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the stock kits
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let mut nodebuff = Kit::new("NoDebuff", MatchMode::Standard);
        nodebuff.loadout = vec![
            "DIAMOND_SWORD".into(),
            "ENDER_PEARL".into(),
            "SPLASH_POTION_OF_HEALING".into(),
        ];
        registry.insert(nodebuff);
        registry.insert(Kit::new("Sumo", MatchMode::Sumo));
        registry.insert(Kit::new("Boxing", MatchMode::Boxing));
        let mut build = Kit::new("BuildUHC", MatchMode::Build);
        build.loadout = vec!["DIAMOND_SWORD".into(), "COBBLESTONE".into(), "LAVA_BUCKET".into()];
        registry.insert(build);
        registry
    }

    /// Load kits from a JSON array
    pub fn load(path: &Path) -> Result<Self, KitError> {
        let raw = std::fs::read_to_string(path)?;
        let kits: Vec<Kit> = serde_json::from_str(&raw)?;
        let registry = Self::new();
        for kit in kits {
            registry.insert(kit);
        }
        info!(path = %path.display(), kits = registry.len(), "Loaded kits");
        Ok(registry)
    }

    pub fn insert(&self, kit: Kit) {
        self.kits.insert(kit.name.to_ascii_lowercase(), Arc::new(kit));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Kit>> {
        self.kits
            .get(&name.to_ascii_lowercase())
            .map(|k| k.value().clone())
    }

    /// Enable or disable a kit; returns false for unknown kits
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.kits.get_mut(&name.to_ascii_lowercase()) {
            Some(mut kit) => {
                let mut updated = (**kit).clone();
                updated.enabled = enabled;
                *kit = Arc::new(updated);
                true
            }
            None => false,
        }
    }

    pub fn all(&self) -> Vec<Arc<Kit>> {
        let mut kits: Vec<Arc<Kit>> = self.kits.iter().map(|k| k.value().clone()).collect();
        kits.sort_by(|a, b| a.name.cmp(&b.name));
        kits
    }

    pub fn len(&self) -> usize {
        self.kits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kits.is_empty()
    }
}
