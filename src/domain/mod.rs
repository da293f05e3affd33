//! Domain Adapter (spec.md §4.1): uniform access to domain-specific YAML
//! regardless of root key.

pub mod item;

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::persistence::YamlFileStore;
use item::ItemRecord;

/// Config contract for a single domain (spec.md §4.1, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    /// Domain name (`materials`, `contaminants`, `compounds`, `settings`).
    pub domain: String,
    /// Path to the domain's YAML data file, relative (absolute paths are
    /// rejected by `AppConfig`/loader validation elsewhere).
    pub data_path: PathBuf,
    /// Root key inside the data file (`materials` | `contaminants` |
    /// `compounds` | `settings`).
    pub data_root_key: String,
    /// Field paths exposed to the prompt assembler. May contain only
    /// classification and raw numeric data — never narrative text fields,
    /// to avoid example-copying into generated prose.
    pub context_keys: Vec<String>,
}

/// Uniform access to a domain's items, independent of the domain's root key
/// or on-disk shape.
pub trait DomainAdapter: Send + Sync {
    /// Load every item in the domain.
    fn load_all(&self) -> Result<Vec<ItemRecord>>;

    /// Load a single item by id. Fails with `Error::Data` if absent —
    /// never returns an empty stand-in.
    fn get_item(&self, item_id: &str) -> Result<ItemRecord>;

    /// Extract the author identifier from an already-loaded item.
    fn get_author_id(&self, item: &ItemRecord) -> Result<String>;

    /// Persist `text` under `component` on `item_id`, preserving the
    /// on-disk key order of the existing record and overwriting only the
    /// touched sub-key.
    fn save_item(&self, item_id: &str, component: &str, text: &str) -> Result<()>;

    /// The context keys this domain exposes to the prompt assembler.
    fn context_keys(&self) -> &[String];
}

/// YAML-file-backed `DomainAdapter`.
pub struct YamlDomainAdapter {
    config: DomainConfig,
    store: YamlFileStore,
}

impl YamlDomainAdapter {
    /// Build an adapter for `config`, rejecting absolute `data_path`s for
    /// cross-environment portability (spec.md §6).
    pub fn new(config: DomainConfig) -> Result<Self> {
        if config.data_path.is_absolute() {
            return Err(Error::config(format!(
                "data_path must be relative, got '{}'",
                config.data_path.display()
            )));
        }
        let store = YamlFileStore::new(config.data_path.clone(), config.data_root_key.clone());
        Ok(Self { config, store })
    }
}

impl DomainAdapter for YamlDomainAdapter {
    fn load_all(&self) -> Result<Vec<ItemRecord>> {
        let root = self.store.load_root()?;
        root.iter()
            .map(|(key, value)| {
                let id = key
                    .as_str()
                    .ok_or_else(|| Error::data("item key is not a string"))?
                    .to_string();
                let fields = value
                    .as_mapping()
                    .cloned()
                    .ok_or_else(|| Error::data(format!("item '{id}' is not a mapping")))?;
                Ok(ItemRecord::new(id, fields))
            })
            .collect()
    }

    fn get_item(&self, item_id: &str) -> Result<ItemRecord> {
        let fields = self.store.load_item(item_id)?;
        Ok(ItemRecord::new(item_id.to_string(), fields))
    }

    fn get_author_id(&self, item: &ItemRecord) -> Result<String> {
        item.author_id()
    }

    fn save_item(&self, item_id: &str, component: &str, text: &str) -> Result<()> {
        self.store.save(item_id, component, text)
    }

    fn context_keys(&self) -> &[String] {
        &self.config.context_keys
    }
}
