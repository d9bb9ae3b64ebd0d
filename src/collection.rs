//! Ordered, keyed list with add/update/delete/move.
//!
//! Backs the user-managed lists in the configuration (accounts, board
//! columns) where position matters and items are addressed by a unique key.

use serde::{Deserialize, Serialize};

/// An item that can be looked up by a unique string key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for String {
    fn key(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("item already exists: {0}")]
    Duplicate(String),
    #[error("item not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedCollection<T> {
    items: Vec<T>,
}

impl<T> Default for OrderedCollection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Keyed> OrderedCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Keys must stay unique.
    pub fn add(&mut self, item: T) -> Result<(), CollectionError> {
        if self.position(item.key()).is_some() {
            return Err(CollectionError::Duplicate(item.key().to_string()));
        }
        self.items.push(item);
        Ok(())
    }

    /// Replace the item stored under `key`, keeping its position.
    pub fn update(&mut self, key: &str, item: T) -> Result<(), CollectionError> {
        let idx = self
            .position(key)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))?;
        if item.key() != key && self.position(item.key()).is_some() {
            return Err(CollectionError::Duplicate(item.key().to_string()));
        }
        self.items[idx] = item;
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<T, CollectionError> {
        let idx = self
            .position(key)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))?;
        Ok(self.items.remove(idx))
    }

    /// Move an item by `offset` positions, clamped to the list bounds.
    pub fn move_by(&mut self, key: &str, offset: isize) -> Result<(), CollectionError> {
        let idx = self
            .position(key)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))?;
        let last = self.items.len() as isize - 1;
        let target = (idx as isize).saturating_add(offset).clamp(0, last) as usize;
        let item = self.items.remove(idx);
        self.items.insert(target, item);
        Ok(())
    }

    /// Check that keys are unique. Deserializing bypasses `add`.
    pub fn validate(&self) -> Result<(), CollectionError> {
        for (idx, item) in self.items.iter().enumerate() {
            if self.position(item.key()) != Some(idx) {
                return Err(CollectionError::Duplicate(item.key().to_string()));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.iter().find(|item| item.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(Keyed::key)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item.key() == key)
    }
}

impl<T> OrderedCollection<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Keyed> FromIterator<T> for OrderedCollection<T> {
    /// Later duplicates are dropped.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        for item in iter {
            collection.add(item).ok();
        }
        collection
    }
}

impl<'a, T> IntoIterator for &'a OrderedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
