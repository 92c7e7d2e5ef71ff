//! Index construction: unique-key maps and grouped maps

use crate::definition::IndexKind;
use crate::extract::{Comparator, KeyFn};
use crate::key::Key;
use std::collections::HashMap;
use std::sync::Arc;

/// A value stored in, or returned from, an index.
#[derive(Debug, PartialEq)]
pub enum Entry<R> {
    One(Arc<R>),
    Many(Vec<Arc<R>>),
}

impl<R> Clone for Entry<R> {
    fn clone(&self) -> Self {
        match self {
            Entry::One(record) => Entry::One(Arc::clone(record)),
            Entry::Many(records) => Entry::Many(records.clone()),
        }
    }
}

impl<R> Entry<R> {
    /// The single record of a unique entry.
    pub fn into_one(self) -> Option<Arc<R>> {
        match self {
            Entry::One(record) => Some(record),
            Entry::Many(_) => None,
        }
    }

    /// The records of a group entry; a unique entry becomes a one-element list.
    pub fn into_many(self) -> Vec<Arc<R>> {
        match self {
            Entry::One(record) => vec![record],
            Entry::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Entry::One(_) => 1,
            Entry::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The derived lookup structure for one index.
#[derive(Debug, PartialEq)]
pub enum CompiledIndex<R> {
    Unique(HashMap<Key, Arc<R>>),
    Group(HashMap<Key, Vec<Arc<R>>>),
}

impl<R> Clone for CompiledIndex<R> {
    fn clone(&self) -> Self {
        match self {
            CompiledIndex::Unique(map) => CompiledIndex::Unique(map.clone()),
            CompiledIndex::Group(map) => CompiledIndex::Group(map.clone()),
        }
    }
}

impl<R> CompiledIndex<R> {
    /// An index with no entries.
    pub fn empty(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Unique => CompiledIndex::Unique(HashMap::new()),
            IndexKind::Group => CompiledIndex::Group(HashMap::new()),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            CompiledIndex::Unique(_) => IndexKind::Unique,
            CompiledIndex::Group(_) => IndexKind::Group,
        }
    }

    /// Look up an already normalized key. Absent keys yield `None` for both
    /// kinds; defaults are the accessor's business.
    pub fn get(&self, key: &Key) -> Option<Entry<R>> {
        match self {
            CompiledIndex::Unique(map) => map.get(key).map(|r| Entry::One(Arc::clone(r))),
            CompiledIndex::Group(map) => map.get(key).map(|rs| Entry::Many(rs.clone())),
        }
    }

    /// Indexed keys in ascending order.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = match self {
            CompiledIndex::Unique(map) => map.keys().cloned().collect(),
            CompiledIndex::Group(map) => map.keys().cloned().collect(),
        };
        keys.sort();
        keys
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        match self {
            CompiledIndex::Unique(map) => map.len(),
            CompiledIndex::Group(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build an index from the full record set.
///
/// Unique indices keep the last record per key in iteration order. Group
/// indices keep iteration order inside each group, or the `sort` order when
/// given; the sort is stable so ties keep their relative order. The input is
/// never modified.
pub fn build<R>(
    kind: IndexKind,
    records: &[Arc<R>],
    extract: &KeyFn<R>,
    sort: Option<&Comparator<R>>,
) -> CompiledIndex<R> {
    match kind {
        IndexKind::Unique => {
            let mut map = HashMap::with_capacity(records.len());
            for (position, record) in records.iter().enumerate() {
                map.insert(extract(&**record, position, records), Arc::clone(record));
            }
            CompiledIndex::Unique(map)
        }
        IndexKind::Group => {
            let mut map: HashMap<Key, Vec<Arc<R>>> = HashMap::new();
            for (position, record) in records.iter().enumerate() {
                map.entry(extract(&**record, position, records))
                    .or_default()
                    .push(Arc::clone(record));
            }
            if let Some(cmp) = sort {
                for group in map.values_mut() {
                    group.sort_by(|a, b| cmp(&**a, &**b));
                }
            }
            CompiledIndex::Group(map)
        }
    }
}
