//! Generic id-keyed entity collection
//!
//! Every entity kind lives in a `Collection` addressed by a stable
//! 1-based integer id. Iteration order is id order. On disk a collection
//! is a JSON array sorted by id; in memory it is a BTreeMap so lookups and
//! ordered iteration both stay cheap.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Implemented by every entity carrying a stable id
pub trait Identified {
    fn id(&self) -> u32;
}

/// Id-keyed container with stable iteration order
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    items: BTreeMap<u32, T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }
}

impl<T: Identified> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.items.contains_key(&id)
    }

    /// First item matching the predicate, in id order
    pub fn find<P: Fn(&T) -> bool>(&self, predicate: P) -> Option<&T> {
        self.items.values().find(|item| predicate(item))
    }

    /// Insert or replace by the item's own id; returns the previous item
    pub fn upsert(&mut self, item: T) -> Option<T> {
        self.items.insert(item.id(), item)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.items.remove(&id)
    }

    /// Items in id order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item whose id fails the predicate; returns removed count
    pub fn retain_ids<P: Fn(u32) -> bool>(&mut self, keep: P) -> usize {
        let before = self.items.len();
        self.items.retain(|id, _| keep(*id));
        before - self.items.len()
    }
}

impl<T: Serialize> Serialize for Collection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.values())
    }
}

impl<'de, T: DeserializeOwned + Identified> Deserialize<'de> for Collection<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items: Vec<T> = Vec::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for item in items {
            map.insert(item.id(), item);
        }
        Ok(Self { items: map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u32,
        name: String,
    }

    impl Identified for Widget {
        fn id(&self) -> u32 {
            self.id
        }
    }

    fn widget(id: u32, name: &str) -> Widget {
        Widget {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn upsert_get_remove() {
        let mut coll = Collection::new();
        assert!(coll.upsert(widget(3, "c")).is_none());
        assert!(coll.upsert(widget(1, "a")).is_none());
        let replaced = coll.upsert(widget(3, "c2"));
        assert_eq!(replaced.unwrap().name, "c");

        assert_eq!(coll.get(1).unwrap().name, "a");
        assert_eq!(coll.len(), 2);
        assert_eq!(coll.remove(1).unwrap().name, "a");
        assert!(coll.get(1).is_none());
    }

    #[test]
    fn iterates_in_id_order() {
        let mut coll = Collection::new();
        coll.upsert(widget(5, "e"));
        coll.upsert(widget(2, "b"));
        coll.upsert(widget(9, "i"));
        let ids: Vec<u32> = coll.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn find_scans_in_id_order() {
        let mut coll = Collection::new();
        coll.upsert(widget(2, "x"));
        coll.upsert(widget(1, "x"));
        let first = coll.find(|w| w.name == "x").unwrap();
        assert_eq!(first.id, 1);
    }

    #[test]
    fn serializes_as_sorted_array() {
        let mut coll = Collection::new();
        coll.upsert(widget(4, "d"));
        coll.upsert(widget(2, "b"));
        let json = serde_json::to_string(&coll).unwrap();
        assert_eq!(json, r#"[{"id":2,"name":"b"},{"id":4,"name":"d"}]"#);

        let back: Collection<Widget> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coll);
    }

    #[test]
    fn retain_ids_counts_removals() {
        let mut coll = Collection::new();
        coll.upsert(widget(1, "a"));
        coll.upsert(widget(2, "b"));
        coll.upsert(widget(3, "c"));
        let removed = coll.retain_ids(|id| id != 2);
        assert_eq!(removed, 1);
        assert!(!coll.contains(2));
    }
}
