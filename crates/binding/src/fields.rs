//! Case-insensitive field maps.
//!
//! Binding data field names are an external contract consumed by name,
//! case-insensitively. [`FieldMap`] keys entries by the lower-cased name and
//! keeps the casing under which a field was first inserted for display.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::{BindingType, BindingValue};

/// Static schema of binding data: field name → type.
pub type BindingDataContract = FieldMap<BindingType>;

/// Per-dispatch binding data: field name → value.
pub type BindingData = FieldMap<BindingValue>;

/// A map from case-insensitive field names to values.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap<V> {
    entries: BTreeMap<String, (String, V)>,
}

impl<V> FieldMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Inserts or overwrites a field, returning the previous value.
    ///
    /// Overwriting keeps the casing of the original name.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        let key = fold(&name);
        if let Some((_, existing)) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(existing, value));
        }
        self.entries.insert(key, (name, value));
        None
    }

    /// Looks a field up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(&fold(name)).map(|(_, v)| v)
    }

    /// Returns `true` if a field with this name exists, ignoring case.
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(&fold(name))
    }

    /// Removes a field by name, ignoring case.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.entries.remove(&fold(name)).map(|(_, v)| v)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates fields in case-insensitive name order, yielding display names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(name, v)| (name.as_str(), v))
    }

    /// Display names in case-insensitive order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(name, _)| name.as_str())
    }
}

impl<V: Clone> FieldMap<V> {
    /// Overlays every entry of `other`, overwriting same-named entries.
    pub fn overlay(&mut self, other: &FieldMap<V>) {
        for (name, value) in other.iter() {
            self.insert(name, value.clone());
        }
    }
}

impl<V> Default for FieldMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for FieldMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl<V: Serialize> Serialize for FieldMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}
