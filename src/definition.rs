//! Index definitions and their validation

use crate::builder::{CompiledIndex, Entry};
use crate::error::{IndexError, Result};
use crate::extract::{compile_key_fn, compile_sort, Comparator, Extractor, KeyFn, Normalizer, SortBy};
use crate::key::Document;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The shape of a compiled index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Key to a single record, last write wins.
    Unique,
    /// Key to every record sharing it.
    Group,
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Unique => "unique",
            IndexKind::Group => "group",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexKind {
    type Err = IndexError;

    /// `"index"` is accepted as an alias of `"unique"`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unique" | "index" => Ok(IndexKind::Unique),
            "group" => Ok(IndexKind::Group),
            other => Err(IndexError::InvalidIndexKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// A declared index over records of type `R`.
///
/// ```rust
/// use indexed_memory::{IndexDefinition, SortBy};
/// use indexed_memory::extract::normalize;
/// use serde_json::Value;
///
/// let by_name = IndexDefinition::<Value>::unique("name")
///     .path("Info.Name")
///     .normalizer(normalize::uppercase());
/// let by_gender = IndexDefinition::<Value>::group("gender").sort(SortBy::path("-id"));
/// # let _ = (by_name, by_gender);
/// ```
#[derive(Debug)]
pub struct IndexDefinition<R> {
    pub(crate) field: String,
    pub(crate) kind: IndexKind,
    pub(crate) extractor: Extractor<R>,
    pub(crate) normalizer: Option<NormalizerSlot>,
    pub(crate) sort: Option<SortBy<R>>,
    pub(crate) default: Option<Entry<R>>,
}

impl<R> Clone for IndexDefinition<R> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            kind: self.kind,
            extractor: self.extractor.clone(),
            normalizer: self.normalizer.clone(),
            sort: self.sort.clone(),
            default: self.default.clone(),
        }
    }
}

/// Debug-printable wrapper around a normalizer.
#[derive(Clone)]
pub(crate) struct NormalizerSlot(pub(crate) Normalizer);

impl fmt::Debug for NormalizerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Normalizer(..)")
    }
}

impl<R: 'static> IndexDefinition<R> {
    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            field: field.into(),
            kind,
            extractor: Extractor::Field,
            normalizer: None,
            sort: None,
            default: None,
        }
    }

    pub fn unique(field: impl Into<String>) -> Self {
        Self::new(field, IndexKind::Unique)
    }

    pub fn group(field: impl Into<String>) -> Self {
        Self::new(field, IndexKind::Group)
    }

    /// Build a definition from a textual kind, as found in configuration.
    pub fn with_kind_name(field: impl Into<String>, kind: &str) -> Result<Self> {
        Ok(Self::new(field, kind.parse()?))
    }

    /// Extract the key from a dotted path instead of the field name.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.extractor = Extractor::Path(path.into());
        self
    }

    pub fn extractor(mut self, extractor: Extractor<R>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Extract the key with a function of the record.
    pub fn key_fn<K, F>(self, f: F) -> Self
    where
        K: Into<crate::key::Key>,
        F: Fn(&R) -> K + 'static,
    {
        self.extractor(Extractor::func(f))
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(NormalizerSlot(normalizer));
        self
    }

    /// Order each group. Only meaningful for group indices.
    pub fn sort(mut self, sort: SortBy<R>) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Value returned by the accessor for keys that are not indexed.
    pub fn default_value(mut self, default: Entry<R>) -> Self {
        self.default = Some(default);
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }
}

/// A validated definition with its functions compiled.
pub(crate) struct CompiledDefinition<R> {
    pub(crate) field: String,
    pub(crate) kind: IndexKind,
    pub(crate) key_fn: KeyFn<R>,
    pub(crate) sort: Option<Comparator<R>>,
    pub(crate) normalizer: Option<Normalizer>,
    pub(crate) default: Option<Entry<R>>,
}

impl<R> CompiledDefinition<R> {
    pub(crate) fn build(&self, records: &[Arc<R>]) -> CompiledIndex<R> {
        crate::builder::build(self.kind, records, &self.key_fn, self.sort.as_ref())
    }
}

/// Validate and compile a set of definitions.
///
/// Fails on repeated field names and on defaults whose shape does not match
/// the index kind. Nothing is indexed when this fails.
pub(crate) fn compile_definitions<R: Document + 'static>(
    definitions: Vec<IndexDefinition<R>>,
) -> Result<Vec<CompiledDefinition<R>>> {
    let mut seen = HashSet::new();
    let mut compiled = Vec::with_capacity(definitions.len());

    for def in definitions {
        if !seen.insert(def.field.clone()) {
            return Err(IndexError::DuplicateIndex { field: def.field });
        }

        match (&def.kind, &def.default) {
            (IndexKind::Unique, Some(Entry::Many(_))) => {
                return Err(IndexError::InvalidDefault {
                    field: def.field,
                    reason: "a unique index cannot default to a record list".to_string(),
                })
            }
            (IndexKind::Group, Some(Entry::One(_))) => {
                return Err(IndexError::InvalidDefault {
                    field: def.field,
                    reason: "a group index must default to a record list".to_string(),
                })
            }
            _ => {}
        }

        let normalizer = def.normalizer.map(|slot| slot.0);
        let key_fn = compile_key_fn(&def.field, &def.extractor, normalizer.as_ref());
        let sort = match def.kind {
            IndexKind::Group => def.sort.as_ref().map(compile_sort),
            IndexKind::Unique => None,
        };

        compiled.push(CompiledDefinition {
            field: def.field,
            kind: def.kind,
            key_fn,
            sort,
            normalizer,
            default: def.default,
        });
    }

    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_kind_from_str() {
        assert_eq!("unique".parse::<IndexKind>().unwrap(), IndexKind::Unique);
        assert_eq!("index".parse::<IndexKind>().unwrap(), IndexKind::Unique);
        assert_eq!("group".parse::<IndexKind>().unwrap(), IndexKind::Group);

        let err = "bucket".parse::<IndexKind>().unwrap_err();
        assert!(matches!(err, IndexError::InvalidIndexKind { ref kind } if kind == "bucket"));
        assert_eq!(err.to_string(), "Invalid index type: bucket");
    }

    #[test]
    fn test_with_kind_name() {
        let def = IndexDefinition::<Value>::with_kind_name("gender", "group").unwrap();
        assert_eq!(def.kind(), IndexKind::Group);
        assert!(IndexDefinition::<Value>::with_kind_name("gender", "tree").is_err());
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let defs = vec![
            IndexDefinition::<Value>::unique("name"),
            IndexDefinition::<Value>::group("name"),
        ];
        assert!(matches!(
            compile_definitions(defs),
            Err(IndexError::DuplicateIndex { .. })
        ));
    }

    #[test]
    fn test_mismatched_default_rejected() {
        let record = Arc::new(json!({"id": 0}));
        let defs = vec![IndexDefinition::<Value>::group("gender").default_value(Entry::One(record))];
        assert!(matches!(
            compile_definitions(defs),
            Err(IndexError::InvalidDefault { .. })
        ));

        let defs = vec![IndexDefinition::<Value>::unique("name").default_value(Entry::Many(vec![]))];
        assert!(matches!(
            compile_definitions(defs),
            Err(IndexError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_sort_ignored_on_unique() {
        let defs = vec![IndexDefinition::<Value>::unique("name").sort(SortBy::path("id"))];
        let compiled = compile_definitions(defs).unwrap();
        assert!(compiled[0].sort.is_none());
    }
}
