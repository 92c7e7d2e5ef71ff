//! Key and sort function compilation
//!
//! Every index is driven by a single extraction function of the shape
//! `(record, position, all_records) -> Key`. This module turns the ways a
//! caller may describe that function (field name, dotted path, closure) plus
//! an optional normalizer into that one shape, and does the same for group
//! sort specifications.

use crate::error::{IndexError, Result};
use crate::key::{Document, Key};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Compiled key extraction function: `(record, position, all_records) -> Key`.
pub type KeyFn<R> = Rc<dyn Fn(&R, usize, &[Arc<R>]) -> Key>;

/// Key normalizer applied at build time and at query time.
pub type Normalizer = Rc<dyn Fn(Key) -> Key>;

/// Compiled comparator used to order records inside a group.
pub type Comparator<R> = Rc<dyn Fn(&R, &R) -> Ordering>;

/// How an index derives the raw key of a record.
pub enum Extractor<R> {
    /// Read the path named by the index field itself.
    Field,
    /// Read a dotted path into the record.
    Path(String),
    /// Call a function with the record, its position, and the full record set.
    Func(KeyFn<R>),
}

impl<R: 'static> Extractor<R> {
    /// Wrap a function of the record alone.
    pub fn func<K, F>(f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + 'static,
    {
        Extractor::Func(Rc::new(move |record: &R, _: usize, _: &[Arc<R>]| {
            f(record).into()
        }))
    }

    /// Wrap a function that also receives the record's position and the full
    /// record set.
    pub fn func_with_context<K, F>(f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R, usize, &[Arc<R>]) -> K + 'static,
    {
        Extractor::Func(Rc::new(move |record: &R, position: usize, all: &[Arc<R>]| {
            f(record, position, all).into()
        }))
    }
}

impl<R> Clone for Extractor<R> {
    fn clone(&self) -> Self {
        match self {
            Extractor::Field => Extractor::Field,
            Extractor::Path(p) => Extractor::Path(p.clone()),
            Extractor::Func(f) => Extractor::Func(Rc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for Extractor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Field => write!(f, "Field"),
            Extractor::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Extractor::Func(_) => write!(f, "Func(..)"),
        }
    }
}

/// How a group index orders the records inside each group.
pub enum SortBy<R> {
    /// Natural key order of a dotted path, optionally reversed.
    Path { path: String, descending: bool },
    /// Natural order of a derived key.
    Key(Rc<dyn Fn(&R) -> Key>),
    /// Arbitrary comparator.
    Compare(Comparator<R>),
}

impl<R: 'static> SortBy<R> {
    /// Parse `"Info.Name"` (ascending) or `"-PID"` (descending).
    pub fn path(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(path) => SortBy::Path {
                path: path.to_string(),
                descending: true,
            },
            None => SortBy::Path {
                path: spec.to_string(),
                descending: false,
            },
        }
    }

    pub fn key<K, F>(f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + 'static,
    {
        SortBy::Key(Rc::new(move |record: &R| f(record).into()))
    }

    pub fn compare<F>(f: F) -> Self
    where
        F: Fn(&R, &R) -> Ordering + 'static,
    {
        SortBy::Compare(Rc::new(f))
    }
}

impl<R> Clone for SortBy<R> {
    fn clone(&self) -> Self {
        match self {
            SortBy::Path { path, descending } => SortBy::Path {
                path: path.clone(),
                descending: *descending,
            },
            SortBy::Key(f) => SortBy::Key(Rc::clone(f)),
            SortBy::Compare(f) => SortBy::Compare(Rc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for SortBy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::Path { path, descending } => f
                .debug_struct("Path")
                .field("path", path)
                .field("descending", descending)
                .finish(),
            SortBy::Key(_) => write!(f, "Key(..)"),
            SortBy::Compare(_) => write!(f, "Compare(..)"),
        }
    }
}

fn path_fn<R: Document + 'static>(path: &str) -> KeyFn<R> {
    let path = path.to_string();
    Rc::new(move |record: &R, _: usize, _: &[Arc<R>]| {
        record.resolve(&path).unwrap_or(Key::Null)
    })
}

/// Compile an extractor and optional normalizer into one key function.
///
/// With a normalizer the result is `normalize(base(record))`; without one the
/// base extractor's key is used as is.
pub fn compile_key_fn<R: Document + 'static>(
    field: &str,
    extractor: &Extractor<R>,
    normalizer: Option<&Normalizer>,
) -> KeyFn<R> {
    let base = match extractor {
        Extractor::Field => path_fn(field),
        Extractor::Path(path) => path_fn(path),
        Extractor::Func(f) => Rc::clone(f),
    };

    match normalizer {
        Some(normalize) => {
            let normalize = Rc::clone(normalize);
            Rc::new(move |record: &R, position: usize, all: &[Arc<R>]| {
                normalize(base(record, position, all))
            })
        }
        None => base,
    }
}

/// Compile a sort specification into a comparator.
pub fn compile_sort<R: Document + 'static>(sort: &SortBy<R>) -> Comparator<R> {
    match sort {
        SortBy::Path { path, descending } => {
            let path = path.clone();
            let descending = *descending;
            // Records without a value at `path` go last in either direction.
            let present = move |record: &R| record.resolve(&path).filter(|k| !k.is_null());
            Rc::new(move |a: &R, b: &R| match (present(a), present(b)) {
                (Some(ka), Some(kb)) if descending => kb.cmp(&ka),
                (Some(ka), Some(kb)) => ka.cmp(&kb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
        }
        SortBy::Key(f) => {
            let f = Rc::clone(f);
            Rc::new(move |a: &R, b: &R| f(a).cmp(&f(b)))
        }
        SortBy::Compare(f) => Rc::clone(f),
    }
}

/// Built-in key normalizers.
pub mod normalize {
    use super::Normalizer;
    use crate::error::{IndexError, Result};
    use crate::key::Key;
    use std::rc::Rc;

    pub fn uppercase() -> Normalizer {
        Rc::new(|key: Key| key.to_uppercase())
    }

    pub fn lowercase() -> Normalizer {
        Rc::new(|key: Key| key.to_lowercase())
    }

    pub fn trim() -> Normalizer {
        Rc::new(|key: Key| key.trimmed())
    }

    /// Look up a built-in normalizer by the name used in configuration files.
    pub fn by_name(name: &str) -> Result<Normalizer> {
        match name {
            "uppercase" | "upper" => Ok(uppercase()),
            "lowercase" | "lower" => Ok(lowercase()),
            "trim" => Ok(trim()),
            other => Err(IndexError::UnknownNormalizer {
                name: other.to_string(),
            }),
        }
    }
}

/// Wrap a plain function as a normalizer.
pub fn normalizer<F>(f: F) -> Normalizer
where
    F: Fn(Key) -> Key + 'static,
{
    Rc::new(f)
}

/// Validate a sort path from configuration.
pub(crate) fn parse_sort_spec<R: 'static>(spec: &str) -> Result<SortBy<R>> {
    let path = spec.strip_prefix('-').unwrap_or(spec);
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(IndexError::ConfigError(format!("Invalid sort path: {:?}", spec)));
    }
    Ok(SortBy::path(spec))
}
