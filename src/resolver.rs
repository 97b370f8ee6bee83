//! Provider configuration resolution and the config store.
//!
//! The orchestrator only depends on [`ConfigResolver`]: "give me the default
//! config for this kind" plus validation. [`ProviderConfigStore`] is the
//! concrete implementation: it owns the whole config set, swaps it atomically
//! on import, and optionally persists it as JSON.
//!
//! Export/import document shape:
//!
//! ```json
//! {
//!   "textApis":  [ { "id": "...", "kind": "text",  "provider": "openai", ... } ],
//!   "imageApis": [ { "id": "...", "kind": "image", "provider": "google", ... } ],
//!   "defaultTextApi":  "id-or-null",
//!   "defaultImageApi": "id-or-null"
//! }
//! ```

use crate::config::{self, GenerationKind, ProviderConfig, ValidationReport};
use crate::error::SlidesError;
use crate::events::{EventBus, SlidesEvent};
use crate::storage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name used when the store is opened on a data directory.
pub const CONFIG_FILE_NAME: &str = "provider-configs.json";

/// Supplies validated default provider configs to the orchestrator.
pub trait ConfigResolver: Send + Sync {
    /// The default config for `kind`, if one is set.
    fn get_default(&self, kind: GenerationKind) -> Option<ProviderConfig>;

    fn validate(&self, config: &ProviderConfig) -> ValidationReport {
        config::validate(config)
    }
}

/// The full provider configuration set, in its import/export shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSet {
    #[serde(default)]
    pub text_apis: Vec<ProviderConfig>,
    #[serde(default)]
    pub image_apis: Vec<ProviderConfig>,
    #[serde(default)]
    pub default_text_api: Option<String>,
    #[serde(default)]
    pub default_image_api: Option<String>,
}

impl ConfigSet {
    pub fn apis(&self, kind: GenerationKind) -> &[ProviderConfig] {
        match kind {
            GenerationKind::Text => &self.text_apis,
            GenerationKind::Image => &self.image_apis,
        }
    }

    fn apis_mut(&mut self, kind: GenerationKind) -> &mut Vec<ProviderConfig> {
        match kind {
            GenerationKind::Text => &mut self.text_apis,
            GenerationKind::Image => &mut self.image_apis,
        }
    }

    pub fn default_id(&self, kind: GenerationKind) -> Option<&str> {
        match kind {
            GenerationKind::Text => self.default_text_api.as_deref(),
            GenerationKind::Image => self.default_image_api.as_deref(),
        }
    }

    fn default_id_mut(&mut self, kind: GenerationKind) -> &mut Option<String> {
        match kind {
            GenerationKind::Text => &mut self.default_text_api,
            GenerationKind::Image => &mut self.default_image_api,
        }
    }

    pub fn find(&self, id: &str) -> Option<&ProviderConfig> {
        self.text_apis
            .iter()
            .chain(self.image_apis.iter())
            .find(|c| c.id == id)
    }

    pub fn default_config(&self, kind: GenerationKind) -> Option<&ProviderConfig> {
        let id = self.default_id(kind)?;
        self.apis(kind).iter().find(|c| c.id == id)
    }

    /// Structural consistency: ids unique, each entry listed under its own
    /// kind, defaults pointing at existing entries.
    pub fn check(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for kind in [GenerationKind::Text, GenerationKind::Image] {
            for c in self.apis(kind) {
                if c.id.trim().is_empty() {
                    return Err(format!("a {kind} provider has an empty id"));
                }
                if c.kind != kind {
                    return Err(format!(
                        "provider '{}' has kind '{}' but is listed under {kind}Apis",
                        c.id, c.kind
                    ));
                }
                if !seen.insert(c.id.as_str()) {
                    return Err(format!("duplicate provider id '{}'", c.id));
                }
            }
            if let Some(id) = self.default_id(kind) {
                if !self.apis(kind).iter().any(|c| c.id == id) {
                    return Err(format!("default {kind} provider '{id}' does not exist"));
                }
            }
        }
        Ok(())
    }
}

/// In-process owner of the provider config set.
#[derive(Debug)]
pub struct ProviderConfigStore {
    set: RwLock<ConfigSet>,
    path: Option<PathBuf>,
    events: Option<EventBus>,
}

impl Default for ProviderConfigStore {
    fn default() -> Self {
        Self::in_memory(ConfigSet::default())
    }
}

impl ProviderConfigStore {
    pub fn in_memory(set: ConfigSet) -> Self {
        Self {
            set: RwLock::new(set),
            path: None,
            events: None,
        }
    }

    /// Load `<dir>/provider-configs.json`, starting empty when absent.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SlidesError> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        let set = storage::read_json::<ConfigSet>(&path)?.unwrap_or_default();
        set.check().map_err(SlidesError::ConfigParse)?;
        Ok(Self {
            set: RwLock::new(set),
            path: Some(path),
            events: None,
        })
    }

    /// Publish [`SlidesEvent::ConfigChanged`] on `bus` after every change.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn snapshot(&self) -> ConfigSet {
        self.set.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<ProviderConfig> {
        self.set.read().find(id).cloned()
    }

    pub fn list(&self, kind: GenerationKind) -> Vec<ProviderConfig> {
        self.set.read().apis(kind).to_vec()
    }

    /// Insert or replace (by id) a config under its kind.
    ///
    /// The first config of a kind becomes that kind's default.
    pub fn upsert(&self, config: ProviderConfig) -> Result<(), SlidesError> {
        if config.id.trim().is_empty() {
            return Err(SlidesError::InvalidConfig("provider id must not be empty".into()));
        }
        self.mutate(|set| {
            if let Some(existing) = set.find(&config.id) {
                if existing.kind != config.kind {
                    return Err(SlidesError::InvalidConfig(format!(
                        "provider id '{}' is already used by a {} provider",
                        config.id, existing.kind
                    )));
                }
            }
            let kind = config.kind;
            let apis = set.apis_mut(kind);
            match apis.iter_mut().find(|c| c.id == config.id) {
                Some(slot) => *slot = config.clone(),
                None => apis.push(config.clone()),
            }
            let default = set.default_id_mut(kind);
            if default.is_none() {
                *default = Some(config.id.clone());
            }
            Ok(())
        })
    }

    /// Remove a config; clears the default if it pointed there.
    pub fn remove(&self, id: &str) -> Result<Option<ProviderConfig>, SlidesError> {
        let mut removed = None;
        self.mutate(|set| {
            for kind in [GenerationKind::Text, GenerationKind::Image] {
                let apis = set.apis_mut(kind);
                if let Some(pos) = apis.iter().position(|c| c.id == id) {
                    removed = Some(apis.remove(pos));
                    let default = set.default_id_mut(kind);
                    if default.as_deref() == Some(id) {
                        *default = None;
                    }
                }
            }
            Ok(())
        })?;
        Ok(removed)
    }

    /// Mark `id` as the default for its kind.
    pub fn set_default(&self, kind: GenerationKind, id: &str) -> Result<(), SlidesError> {
        self.mutate(|set| {
            if !set.apis(kind).iter().any(|c| c.id == id) {
                return Err(SlidesError::InvalidConfig(format!(
                    "no {kind} provider with id '{id}'"
                )));
            }
            *set.default_id_mut(kind) = Some(id.to_string());
            Ok(())
        })
    }

    /// Export the whole set as a pretty JSON document.
    pub fn export_json(&self) -> Result<String, SlidesError> {
        serde_json::to_string_pretty(&*self.set.read())
            .map_err(|e| SlidesError::Internal(format!("config export failed: {e}")))
    }

    /// Replace the entire set from a JSON document.
    ///
    /// Parsing and consistency checks happen before anything is touched; on
    /// error the previous set is left exactly as it was.
    pub fn import_json(&self, json: &str) -> Result<(), SlidesError> {
        let incoming: ConfigSet =
            serde_json::from_str(json).map_err(|e| SlidesError::ConfigParse(e.to_string()))?;
        incoming.check().map_err(SlidesError::ConfigParse)?;

        let count = incoming.text_apis.len() + incoming.image_apis.len();
        self.mutate(move |set| {
            *set = incoming;
            Ok(())
        })?;
        info!("Imported {count} provider configs");
        Ok(())
    }

    /// Apply `edit` to a copy, persist it, then swap it in.
    fn mutate(
        &self,
        edit: impl FnOnce(&mut ConfigSet) -> Result<(), SlidesError>,
    ) -> Result<(), SlidesError> {
        {
            let mut guard = self.set.write();
            let mut next = guard.clone();
            edit(&mut next)?;
            if let Some(path) = &self.path {
                storage::write_json_atomic(path, &next)?;
            }
            *guard = next;
        }
        if let Some(bus) = &self.events {
            bus.publish(SlidesEvent::ConfigChanged);
        }
        Ok(())
    }
}

impl ConfigResolver for ProviderConfigStore {
    fn get_default(&self, kind: GenerationKind) -> Option<ProviderConfig> {
        let set = self.set.read();
        let found = set.default_config(kind).cloned();
        if found.is_none() {
            if let Some(id) = set.default_id(kind) {
                warn!("Default {kind} provider '{id}' is missing from the config set");
            }
        }
        found
    }
}
