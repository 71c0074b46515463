use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::filter::SavedFilters;
use crate::store::Collection;

pub const ITEMS_FILE: &str = "simpleList.json";
pub const FILTERS_FILE: &str = "savedFilters.json";
pub const EXPORT_FILE: &str = "simpleListExport.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no save location selected; run `sl location <DIR>` to choose one")]
    LocationNotSelected,

    #[error("invalid import file {}: {source}", path.display())]
    InvalidImport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Whole-file JSON persistence for the item collection and filter sets.
///
/// Every save rewrites the complete file through a temp file in the same
/// directory. There is no locking: the last writer wins.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub items_path: PathBuf,
    pub filters_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let items_path = data_dir.join(ITEMS_FILE);
        let filters_path = data_dir.join(FILTERS_FILE);

        info!(
            data_dir = %data_dir.display(),
            items = %items_path.display(),
            filters = %filters_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            items_path,
            filters_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_items(&self) -> anyhow::Result<Collection> {
        if !self.items_path.exists() {
            debug!(file = %self.items_path.display(), "no item file yet; starting empty");
            return Ok(Collection::new());
        }

        let raw = fs::read_to_string(&self.items_path)
            .with_context(|| format!("failed reading {}", self.items_path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Collection::new());
        }

        let items: Collection = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.items_path.display()))?;
        debug!(count = items.len(), "loaded items");
        Ok(normalize_ids(items))
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub fn save_items(&self, items: &Collection) -> anyhow::Result<()> {
        save_json_atomic(&self.items_path, items).context("failed to save item collection")
    }

    /// Saved filter sets, with the active set seeded when missing or empty.
    #[tracing::instrument(skip(self))]
    pub fn load_filters(&self) -> anyhow::Result<SavedFilters> {
        let mut saved = if self.filters_path.exists() {
            let raw = fs::read_to_string(&self.filters_path)
                .with_context(|| format!("failed reading {}", self.filters_path.display()))?;
            if raw.trim().is_empty() {
                SavedFilters::default()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed parsing {}", self.filters_path.display()))?
            }
        } else {
            SavedFilters::default()
        };

        saved.ensure_active();
        Ok(saved)
    }

    #[tracing::instrument(skip(self, saved))]
    pub fn save_filters(&self, saved: &SavedFilters) -> anyhow::Result<()> {
        save_json_atomic(&self.filters_path, saved).context("failed to save filter sets")
    }

    /// Writes `items` to `target`; a directory receives `simpleListExport.json`.
    #[tracing::instrument(skip(self, items, target))]
    pub fn export_to(&self, items: &Collection, target: &Path) -> anyhow::Result<PathBuf> {
        let path = if target.is_dir() {
            target.join(EXPORT_FILE)
        } else {
            target.to_path_buf()
        };
        save_json_atomic(&path, items)
            .with_context(|| format!("failed exporting to {}", path.display()))?;
        info!(file = %path.display(), count = items.len(), "exported items");
        Ok(path)
    }
}

/// Reads an exported collection. Malformed content is reported as
/// `StoreError::InvalidImport` rather than a bare parse failure.
#[tracing::instrument]
pub fn import_file(path: &Path) -> anyhow::Result<Collection> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let items: Collection =
        serde_json::from_str(&raw).map_err(|source| StoreError::InvalidImport {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(count = items.len(), "parsed import file");
    Ok(normalize_ids(items))
}

/// The map key is authoritative for an item's id.
fn normalize_ids(mut items: Collection) -> Collection {
    for (key, item) in items.iter_mut() {
        if item.id != *key {
            if !item.id.is_empty() {
                warn!(key = %key, id = %item.id, "item id disagrees with its key; using key");
            }
            item.id = key.clone();
        }
    }
    items
}

fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json atomically");

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut temp, value)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// Remembers the directory the user picked as save location.
#[derive(Debug, Clone)]
pub struct LocationRegistry {
    path: PathBuf,
}

impl LocationRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_config_dir() -> anyhow::Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow!("cannot determine config directory"))?;
        Ok(Self::new(base.join("simplelist").join("location")))
    }

    pub fn selected(&self) -> anyhow::Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(trimmed)))
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn select(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let absolute = dir
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", dir.display()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, absolute.to_string_lossy().as_bytes())
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        info!(location = %absolute.display(), "save location selected");
        Ok(absolute)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::item::Item;

    #[test]
    fn missing_files_load_as_empty_defaults() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();

        assert!(store.load_items().unwrap().is_empty());
        let saved = store.load_filters().unwrap();
        assert_eq!(saved.active(), &SavedFilters::default_active_set());
    }

    #[test]
    fn items_roundtrip_in_original_layout() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut item = Item::new_draft("abc".to_string(), now, vec![]);
        item.summary = "Buy milk".to_string();
        let mut items = Collection::new();
        items.insert(item.id.clone(), item);

        store.save_items(&items).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&store.items_path).unwrap()).unwrap();
        assert_eq!(raw["abc"]["summary"], "Buy milk");
        assert!(raw["abc"]["tags"][0].as_str().unwrap().starts_with("$Created="));

        assert_eq!(store.load_items().unwrap(), items);
    }

    #[test]
    fn malformed_import_is_reported_as_invalid_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = import_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidImport { .. })
        ));
    }

    #[test]
    fn import_takes_ids_from_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("in.json");
        fs::write(
            &path,
            r#"{"k1":{"summary":"one","description":"","tags":["$Created=1"]},
                "k2":{"id":"other","summary":"two","tags":[]}}"#,
        )
        .unwrap();

        let items = import_file(&path).unwrap();
        assert_eq!(items["k1"].id, "k1");
        assert_eq!(items["k2"].id, "k2");
        assert_eq!(items["k2"].description, "");
    }

    #[test]
    fn export_into_directory_uses_fixed_name() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(&temp.path().join("data")).unwrap();
        let out = store.export_to(&Collection::new(), temp.path()).unwrap();
        assert_eq!(out, temp.path().join(EXPORT_FILE));
        assert_eq!(fs::read_to_string(out).unwrap(), "{}");
    }

    #[test]
    fn location_registry_remembers_selection() {
        let temp = tempdir().unwrap();
        let registry = LocationRegistry::new(temp.path().join("cfg").join("location"));
        assert_eq!(registry.selected().unwrap(), None);

        let chosen = registry.select(&temp.path().join("lists")).unwrap();
        assert_eq!(registry.selected().unwrap(), Some(chosen.clone()));
        assert!(chosen.is_dir());
    }
}
