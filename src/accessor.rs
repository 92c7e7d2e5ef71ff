//! Named lookup accessors
//!
//! Every index field `F` gets a lookup registered as `getBy<F>` and an index
//! name `by<F>`. The lookup closures are built once, when the collection is
//! constructed, and resolve the live registry slot on every call.

use crate::builder::{CompiledIndex, Entry};
use crate::collection::IndexedCollection;
use crate::definition::{CompiledDefinition, IndexKind};
use crate::error::{IndexError, Result};
use crate::extract::Normalizer;
use crate::key::Key;
use crate::store::Collection;
use std::collections::HashMap;
use std::rc::Rc;

/// Lookup closure: normalizes the raw key, reads the index, applies the default.
pub(crate) type LookupFn<R> = Rc<dyn Fn(&CompiledIndex<R>, Key) -> Option<Entry<R>>>;

fn upper_first(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Name of the generated lookup for `field`, e.g. `getByName`.
pub fn accessor_name(field: &str) -> String {
    format!("getBy{}", upper_first(field))
}

/// Name under which the index structure for `field` is exposed, e.g. `byName`.
pub fn index_name(field: &str) -> String {
    format!("by{}", upper_first(field))
}

pub(crate) fn lookup_fn<R: 'static>(
    kind: IndexKind,
    normalizer: Option<Normalizer>,
    default: Option<Entry<R>>,
) -> LookupFn<R> {
    let default = match kind {
        IndexKind::Group => Some(default.unwrap_or(Entry::Many(Vec::new()))),
        IndexKind::Unique => default,
    };

    Rc::new(move |index: &CompiledIndex<R>, raw: Key| {
        let key = match &normalizer {
            Some(normalize) => normalize(raw),
            None => raw,
        };
        index.get(&key).or_else(|| default.clone())
    })
}

pub(crate) struct AccessorEntry<R> {
    pub(crate) field: String,
    pub(crate) name: String,
    pub(crate) kind: IndexKind,
    pub(crate) lookup: LookupFn<R>,
}

/// Registry of generated accessors, addressed by field, accessor name or
/// index name. Slot numbers match the definition order.
pub(crate) struct AccessorTable<R> {
    entries: Vec<AccessorEntry<R>>,
    by_field: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_index_name: HashMap<String, usize>,
}

impl<R: 'static> AccessorTable<R> {
    pub(crate) fn new(definitions: &[CompiledDefinition<R>]) -> Result<Self> {
        let mut table = AccessorTable {
            entries: Vec::with_capacity(definitions.len()),
            by_field: HashMap::new(),
            by_name: HashMap::new(),
            by_index_name: HashMap::new(),
        };

        for (slot, def) in definitions.iter().enumerate() {
            let name = accessor_name(&def.field);
            if table.by_name.contains_key(&name) {
                return Err(IndexError::ConfigError(format!(
                    "accessor {} is generated by more than one index (last: {})",
                    name, def.field
                )));
            }

            table.by_field.insert(def.field.clone(), slot);
            table.by_name.insert(name.clone(), slot);
            table.by_index_name.insert(index_name(&def.field), slot);
            table.entries.push(AccessorEntry {
                field: def.field.clone(),
                name,
                kind: def.kind,
                lookup: lookup_fn(def.kind, def.normalizer.clone(), def.default.clone()),
            });
        }

        Ok(table)
    }

    pub(crate) fn entry(&self, slot: usize) -> &AccessorEntry<R> {
        &self.entries[slot]
    }

    pub(crate) fn slot_for_field(&self, field: &str) -> Result<usize> {
        self.by_field
            .get(field)
            .copied()
            .ok_or_else(|| IndexError::UnknownIndex {
                field: field.to_string(),
            })
    }

    pub(crate) fn slot_for_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn slot_for_index_name(&self, name: &str) -> Result<usize> {
        self.by_index_name
            .get(name)
            .copied()
            .ok_or_else(|| IndexError::UnknownIndex {
                field: name.to_string(),
            })
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.field.as_str())
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

/// A generated lookup bound to a collection.
///
/// The handle does not capture index contents: every [`Accessor::get`] reads
/// whatever the collection's registry holds at that moment, rebuilding first
/// if the registry is stale.
pub struct Accessor<'a, S: Collection> {
    pub(crate) collection: &'a IndexedCollection<S>,
    pub(crate) slot: usize,
}

impl<'a, S: Collection> Accessor<'a, S> {
    /// Look up a raw, un-normalized key.
    pub fn get(&self, key: impl Into<Key>) -> Option<Entry<S::Record>> {
        self.collection.lookup_slot(self.slot, key.into())
    }

    pub fn field(&self) -> &str {
        &self.collection.accessors().entry(self.slot).field
    }

    pub fn name(&self) -> &str {
        &self.collection.accessors().entry(self.slot).name
    }

    pub fn kind(&self) -> IndexKind {
        self.collection.accessors().entry(self.slot).kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::normalize;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[test]
    fn test_generated_names() {
        assert_eq!(accessor_name("name"), "getByName");
        assert_eq!(accessor_name("Gender"), "getByGender");
        assert_eq!(index_name("country"), "byCountry");
        assert_eq!(accessor_name(""), "getBy");
    }

    #[test]
    fn test_lookup_normalizes_raw_key() {
        let record = Arc::new(json!({"name": "Carl"}));
        let mut map = HashMap::new();
        map.insert(Key::from("CARL"), Arc::clone(&record));
        let index = CompiledIndex::Unique(map);

        let lookup = lookup_fn::<Value>(IndexKind::Unique, Some(normalize::uppercase()), None);
        assert_eq!(lookup(&index, Key::from("carl")), Some(Entry::One(record)));
        assert_eq!(lookup(&index, Key::from("dora")), None);
    }

    #[test]
    fn test_group_lookup_defaults_to_empty() {
        let index = CompiledIndex::<Value>::empty(IndexKind::Group);
        let lookup = lookup_fn::<Value>(IndexKind::Group, None, None);
        assert_eq!(lookup(&index, Key::from("?")), Some(Entry::Many(vec![])));
    }

    #[test]
    fn test_unique_lookup_with_configured_default() {
        let fallback = Arc::new(json!({"name": "nobody"}));
        let index = CompiledIndex::<Value>::empty(IndexKind::Unique);
        let lookup = lookup_fn(IndexKind::Unique, None, Some(Entry::One(Arc::clone(&fallback))));
        assert_eq!(lookup(&index, Key::from("x")), Some(Entry::One(fallback)));
    }
}
