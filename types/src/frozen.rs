//! Deeply immutable containers used inside [`Term`](crate::Term).
//!
//! Each container wraps `Arc` storage and only hands out shared references.
//! Operations that would "modify" a container build a new one of the same
//! type, so a frozen value can never leak a mutable view through composition.
//! Cloning is a reference-count bump.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, btree_map, btree_set};
use std::fmt;
use std::ops::Deref;
use std::slice;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

// ============================================================================
// FrozenList
// ============================================================================

/// Ordered, immutable sequence.
#[derive(PartialEq, Eq, Hash)]
pub struct FrozenList<T>(Arc<[T]>);

impl<T> FrozenList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}

impl<T: Clone> FrozenList<T> {
    /// New list with `item` appended.
    #[must_use]
    pub fn with(&self, item: T) -> Self {
        let mut items = self.0.to_vec();
        items.push(item);
        Self::from(items)
    }

    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut items = self.0.to_vec();
        items.extend_from_slice(&other.0);
        Self::from(items)
    }
}

impl<T> Clone for FrozenList<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for FrozenList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for FrozenList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> From<Vec<T>> for FrozenList<T> {
    fn from(items: Vec<T>) -> Self {
        Self(Arc::from(items))
    }
}

impl<T> FromIterator<T> for FrozenList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<'a, T> IntoIterator for &'a FrozenList<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for FrozenList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<T: Serialize> Serialize for FrozenList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FrozenList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Self::from)
    }
}

// ============================================================================
// FrozenSet
// ============================================================================

/// Immutable set with sorted iteration order.
#[derive(PartialEq, Eq, Hash)]
pub struct FrozenSet<T: Ord>(Arc<BTreeSet<T>>);

impl<T: Ord> FrozenSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(BTreeSet::new()))
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.0.contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl<T: Ord + Clone> FrozenSet<T> {
    #[must_use]
    pub fn with(&self, item: T) -> Self {
        let mut items = (*self.0).clone();
        items.insert(item);
        Self(Arc::new(items))
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(Arc::new(self.0.union(&other.0).cloned().collect()))
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(Arc::new(self.0.difference(&other.0).cloned().collect()))
    }
}

impl<T: Ord> Clone for FrozenSet<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Ord> Default for FrozenSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for FrozenSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl<'a, T: Ord> IntoIterator for &'a FrozenSet<T> {
    type Item = &'a T;
    type IntoIter = btree_set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Ord + fmt::Debug> fmt::Debug for FrozenSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl<T: Ord + Serialize> Serialize for FrozenSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de, T: Ord + Deserialize<'de>> Deserialize<'de> for FrozenSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeSet::<T>::deserialize(deserializer).map(|set| Self(Arc::new(set)))
    }
}

// ============================================================================
// FrozenMap
// ============================================================================

/// Immutable map with sorted key order.
#[derive(PartialEq, Eq, Hash)]
pub struct FrozenMap<K: Ord, V>(Arc<BTreeMap<K, V>>);

impl<K: Ord, V> FrozenMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(BTreeMap::new()))
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.0.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Ord + Clone, V: Clone> FrozenMap<K, V> {
    /// New map with `key` set to `value`, replacing any previous entry.
    #[must_use]
    pub fn with_entry(&self, key: K, value: V) -> Self {
        let mut entries = (*self.0).clone();
        entries.insert(key, value);
        Self(Arc::new(entries))
    }

    /// New map holding both sets of entries; `other` wins on key collisions.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut entries = (*self.0).clone();
        entries.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(Arc::new(entries))
    }
}

impl<K: Ord, V> Clone for FrozenMap<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K: Ord, V> Default for FrozenMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for FrozenMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl<K: Ord, V> From<BTreeMap<K, V>> for FrozenMap<K, V> {
    fn from(entries: BTreeMap<K, V>) -> Self {
        Self(Arc::new(entries))
    }
}

impl<'a, K: Ord, V> IntoIterator for &'a FrozenMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = btree_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug> fmt::Debug for FrozenMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl<K: Ord + Serialize, V: Serialize> Serialize for FrozenMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter())
    }
}

impl<'de, K, V> Deserialize<'de> for FrozenMap<K, V>
where
    K: Ord + Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<K, V>::deserialize(deserializer).map(Self::from)
    }
}
