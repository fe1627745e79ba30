//! Registry document: per-blob read progress shared by every reader.
//!
//! # Document Format
//!
//! A JSON object keyed by blob path:
//!
//! ```json
//! {
//!   "logs/a.log": {
//!     "file_path": "logs/a.log",
//!     "etag": "0x8DC0F7A1B2C3D4E",
//!     "reader": "reader-a",
//!     "offset": 2048,
//!     "gen": 1,
//!     "claimed_at": 1760000000
//!   },
//!   "logs/b.log": { "file_path": "logs/b.log", "etag": "", "reader": null, "offset": 0, "gen": 0 }
//! }
//! ```
//!
//! Unknown fields are ignored so older readers keep working when fields are
//! added. An owner of `null`, `""` or a missing `reader` field all mean
//! unclaimed.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use flurry_core::storage::BlobMeta;

use crate::config::CreatePolicy;

/// Read progress for one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryItem {
    pub file_path: String,
    /// Last observed version tag; bookkeeping only.
    #[serde(default)]
    pub etag: String,
    /// Reader currently claiming the blob.
    #[serde(rename = "reader", default, deserialize_with = "deserialize_owner")]
    pub owner: Option<String>,
    /// Next unread byte.
    #[serde(default)]
    pub offset: u64,
    /// Fairness counter; lower is more overdue.
    #[serde(rename = "gen", default)]
    pub generation: u32,
    /// Unix seconds of the last claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
}

fn deserialize_owner<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let owner = Option::<String>::deserialize(deserializer)?;
    Ok(owner.filter(|o| !o.is_empty()))
}

impl RegistryItem {
    /// A fresh entry for `blob` starting at `offset`.
    pub fn new(blob: &BlobMeta, offset: u64) -> Self {
        Self {
            file_path: blob.path.clone(),
            etag: blob.etag.clone(),
            owner: None,
            offset,
            generation: 0,
            claimed_at: None,
        }
    }

    pub fn is_owned_by(&self, reader: &str) -> bool {
        self.owner.as_deref() == Some(reader)
    }

    /// Clear the owner if it is `reader`. Returns true if it was.
    pub fn release(&mut self, reader: &str) -> bool {
        if self.is_owned_by(reader) {
            self.owner = None;
            true
        } else {
            false
        }
    }
}

/// Mapping from blob path to its progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, RegistryItem>,
}

impl Registry {
    /// Build the first registry for a container.
    ///
    /// `resume` marks existing content as read; `start_over` queues all of it.
    pub fn create(blobs: &[BlobMeta], policy: CreatePolicy) -> Self {
        let entries = blobs
            .iter()
            .map(|blob| {
                let offset = match policy {
                    CreatePolicy::Resume => blob.content_length,
                    CreatePolicy::StartOver => 0,
                };
                (blob.path.clone(), RegistryItem::new(blob, offset))
            })
            .collect();
        Self { entries }
    }

    /// Add entries for blobs not yet tracked. Returns how many were added.
    ///
    /// Blobs appearing after creation are always read from the start.
    pub fn learn(&mut self, blobs: &[BlobMeta]) -> usize {
        let mut added = 0;
        for blob in blobs {
            if !self.entries.contains_key(&blob.path) {
                self.entries
                    .insert(blob.path.clone(), RegistryItem::new(blob, 0));
                added += 1;
            }
        }
        added
    }

    /// Clear every claim held by `reader`. Returns how many were cleared.
    pub fn release_all(&mut self, reader: &str) -> usize {
        let mut cleared = 0;
        for item in self.entries.values_mut() {
            if item.release(reader) {
                cleared += 1;
            }
        }
        cleared
    }

    /// Paths currently claimed by `reader`.
    pub fn owned_by<'a>(&'a self, reader: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(_, item)| item.is_owned_by(reader))
            .map(|(path, _)| path.as_str())
    }

    pub fn get(&self, path: &str) -> Option<&RegistryItem> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut RegistryItem> {
        self.entries.get_mut(path)
    }

    pub fn insert(&mut self, item: RegistryItem) {
        self.entries.insert(item.file_path.clone(), item);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryItem)> {
        self.entries.iter()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut RegistryItem> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest generation across all entries.
    pub fn min_generation(&self) -> Option<u32> {
        self.entries.values().map(|item| item.generation).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str, len: u64) -> BlobMeta {
        BlobMeta {
            path: path.to_string(),
            etag: format!("etag-{path}"),
            content_length: len,
        }
    }

    #[test]
    fn test_create_policies() {
        let blobs = [blob("a.log", 4096), blob("b.log", 2048)];

        let resumed = Registry::create(&blobs, CreatePolicy::Resume);
        assert_eq!(resumed.get("a.log").unwrap().offset, 4096);
        assert_eq!(resumed.get("b.log").unwrap().offset, 2048);

        let fresh = Registry::create(&blobs, CreatePolicy::StartOver);
        assert_eq!(fresh.get("a.log").unwrap().offset, 0);
        assert_eq!(fresh.get("a.log").unwrap().generation, 0);
        assert_eq!(fresh.get("a.log").unwrap().etag, "etag-a.log");
        assert!(fresh.get("b.log").unwrap().owner.is_none());
    }

    #[test]
    fn test_learn_only_adds_unseen() {
        let mut registry = Registry::create(&[blob("a.log", 10)], CreatePolicy::Resume);
        let added = registry.learn(&[blob("a.log", 20), blob("c.log", 5)]);

        assert_eq!(added, 1);
        assert_eq!(registry.get("a.log").unwrap().offset, 10);
        assert_eq!(registry.get("c.log").unwrap().offset, 0);
    }

    #[test]
    fn test_owner_forms() {
        let json = r#"{
            "a": {"file_path": "a", "etag": "x", "reader": null, "offset": 1, "gen": 2},
            "b": {"file_path": "b", "etag": "y", "reader": "", "offset": 3, "gen": 0},
            "c": {"file_path": "c", "etag": "z", "offset": 0, "gen": 0},
            "d": {"file_path": "d", "etag": "w", "reader": "r1", "offset": 0, "gen": 0}
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();

        assert!(registry.get("a").unwrap().owner.is_none());
        assert!(registry.get("b").unwrap().owner.is_none());
        assert!(registry.get("c").unwrap().owner.is_none());
        assert_eq!(registry.get("d").unwrap().owner.as_deref(), Some("r1"));
        assert_eq!(registry.get("a").unwrap().generation, 2);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"a": {"file_path": "a", "etag": "", "reader": null,
            "offset": 7, "gen": 1, "future_field": [1, 2, 3]}}"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.get("a").unwrap().offset, 7);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut registry = Registry::create(&[blob("a.log", 0)], CreatePolicy::StartOver);
        registry.get_mut("a.log").unwrap().owner = Some("r1".to_string());

        let value = serde_json::to_value(&registry).unwrap();
        let entry = &value["a.log"];
        assert_eq!(entry["file_path"], "a.log");
        assert_eq!(entry["reader"], "r1");
        assert_eq!(entry["gen"], 0);
        assert_eq!(entry["offset"], 0);
        assert!(entry.get("claimed_at").is_none());

        registry.get_mut("a.log").unwrap().owner = None;
        let value = serde_json::to_value(&registry).unwrap();
        assert!(value["a.log"]["reader"].is_null());
    }

    #[test]
    fn test_release_all_only_touches_own_claims() {
        let mut registry = Registry::create(
            &[blob("a", 1), blob("b", 1), blob("c", 1)],
            CreatePolicy::StartOver,
        );
        registry.get_mut("a").unwrap().owner = Some("r1".to_string());
        registry.get_mut("b").unwrap().owner = Some("r2".to_string());
        registry.get_mut("c").unwrap().owner = Some("r1".to_string());

        assert_eq!(registry.owned_by("r1").count(), 2);
        assert_eq!(registry.release_all("r1"), 2);
        assert_eq!(registry.owned_by("r1").count(), 0);
        assert_eq!(registry.get("b").unwrap().owner.as_deref(), Some("r2"));
    }
}
