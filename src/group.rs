// SPDX-License-Identifier: MIT
//! Resource groups: flat, mergeable name → entry mappings
//!
//! A group keeps entries in insertion order with O(1) lookup by name. It may
//! carry versioned overlays: for runtime version `V`, lookup consults the
//! overlays with threshold ≤ `V`, highest first, before the base entries.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::OnceCell;

use crate::entry::ResourceEntry;
use crate::error::{ContainerError, Result};

#[derive(Debug, Clone, Default)]
pub struct ResourceGroup {
    name: OnceCell<String>,
    entries: Vec<ResourceEntry>,
    index: HashMap<String, usize>,
    overlays: BTreeMap<u32, ResourceGroup>,
}

impl ResourceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group's name. Only the first call succeeds.
    pub fn init_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.name.set(name).map_err(|attempted| {
            ContainerError::GroupNameAlreadySet {
                current: self.name.get().cloned().unwrap_or_default(),
                attempted,
            }
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Insert an entry, replacing any entry with the same name.
    ///
    /// A replaced entry keeps its iteration position. Returns the replaced entry.
    pub fn insert(&mut self, entry: ResourceEntry) -> Option<ResourceEntry> {
        match self.index.get(entry.name()) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos], entry)),
            None => {
                self.index.insert(entry.name().to_string(), self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(ResourceEntry::name)
    }

    /// Merge `other` into `self`; `other` wins on name collisions.
    ///
    /// Overlays are merged threshold by threshold with the same rule.
    pub fn merge(&mut self, other: &ResourceGroup) {
        for entry in other.iter() {
            self.insert(entry.clone());
        }
        for (&threshold, overlay) in &other.overlays {
            self.overlays.entry(threshold).or_default().merge(overlay);
        }
    }

    /// Overlay group for `threshold`, created on first use
    pub fn overlay_mut(&mut self, threshold: u32) -> &mut ResourceGroup {
        self.overlays.entry(threshold).or_default()
    }

    pub fn set_overlay(&mut self, threshold: u32, overlay: ResourceGroup) {
        self.overlays.insert(threshold, overlay);
    }

    /// Overlays in ascending threshold order
    pub fn overlays(&self) -> impl Iterator<Item = (u32, &ResourceGroup)> {
        self.overlays.iter().map(|(&t, g)| (t, g))
    }

    pub fn has_overlays(&self) -> bool {
        !self.overlays.is_empty()
    }

    /// Effective entry for `name` at `runtime_version`
    pub fn lookup(&self, name: &str, runtime_version: u32) -> Option<&ResourceEntry> {
        self.overlays
            .range(..=runtime_version)
            .rev()
            .find_map(|(_, overlay)| overlay.get(name))
            .or_else(|| self.get(name))
    }

    /// Number of entries across the base group and all overlays
    pub fn total_len(&self) -> usize {
        self.len() + self.overlays.values().map(ResourceGroup::total_len).sum::<usize>()
    }
}

/// Equality compares content; the one-shot name is not part of it.
impl PartialEq for ResourceGroup {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.overlays == other.overlays
    }
}

impl Eq for ResourceGroup {}

impl FromIterator<ResourceEntry> for ResourceGroup {
    fn from_iter<I: IntoIterator<Item = ResourceEntry>>(iter: I) -> Self {
        let mut group = ResourceGroup::new();
        for entry in iter {
            group.insert(entry);
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CompressionMethod;

    fn entry(name: &str, offset: u64) -> ResourceEntry {
        ResourceEntry::new(name, offset, 1, CompressionMethod::Store, 1).unwrap()
    }

    #[test]
    fn test_name_set_once() {
        let group = ResourceGroup::new();
        assert_eq!(group.name(), None);
        group.init_name("app").unwrap();
        assert_eq!(group.name(), Some("app"));

        let err = group.init_name("other").unwrap_err();
        assert!(matches!(err, ContainerError::GroupNameAlreadySet { .. }));
        assert_eq!(group.name(), Some("app"));
    }

    #[test]
    fn test_insertion_order_and_replace_in_place() {
        let mut group = ResourceGroup::new();
        group.insert(entry("b", 0));
        group.insert(entry("a", 1));
        let replaced = group.insert(entry("b", 2));

        assert_eq!(replaced.unwrap().data_offset(), 0);
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(group.get("b").unwrap().data_offset(), 2);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut a: ResourceGroup = [entry("x", 1)].into_iter().collect();
        let b: ResourceGroup = [entry("x", 2), entry("y", 3)].into_iter().collect();
        a.merge(&b);

        assert_eq!(a.len(), 2);
        assert_eq!(a.get("x").unwrap().data_offset(), 2);
        assert_eq!(a.get("y").unwrap().data_offset(), 3);
    }

    #[test]
    fn test_versioned_lookup() {
        let mut group: ResourceGroup = [entry("foo.txt", 1), entry("bar.txt", 5)]
            .into_iter()
            .collect();
        group.overlay_mut(11).insert(entry("foo.txt", 2));
        group.overlay_mut(17).insert(entry("bar.txt", 6));

        assert_eq!(group.lookup("foo.txt", 8).unwrap().data_offset(), 1);
        assert_eq!(group.lookup("foo.txt", 11).unwrap().data_offset(), 2);
        assert_eq!(group.lookup("foo.txt", 17).unwrap().data_offset(), 2);
        assert_eq!(group.lookup("bar.txt", 16).unwrap().data_offset(), 5);
        assert_eq!(group.lookup("bar.txt", 21).unwrap().data_offset(), 6);
        assert!(group.lookup("missing", 21).is_none());
        assert_eq!(group.total_len(), 4);
    }

    #[test]
    fn test_merge_overlays() {
        let mut a = ResourceGroup::new();
        a.overlay_mut(11).insert(entry("v", 1));
        let mut b = ResourceGroup::new();
        b.overlay_mut(11).insert(entry("v", 2));
        b.overlay_mut(17).insert(entry("w", 3));

        a.merge(&b);
        assert_eq!(a.lookup("v", 11).unwrap().data_offset(), 2);
        assert_eq!(a.lookup("w", 17).unwrap().data_offset(), 3);
        assert!(a.lookup("w", 16).is_none());
    }
}
