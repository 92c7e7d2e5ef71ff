//! Index keys and path access into records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A scalar value that indices are keyed by.
///
/// Keys are hashable and totally ordered so they can drive both map lookups
/// and sorting. Floats with an integral value are stored as [`Key::Int`] when
/// built through `From<f64>`, so `1.0` and `1` address the same entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Key {
    /// Parse a key typed on a command line or in a config file.
    ///
    /// Anything that reads as a JSON scalar becomes that scalar; everything
    /// else is taken verbatim as a string.
    pub fn parse(s: &str) -> Key {
        match serde_json::from_str::<Value>(s) {
            Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
                Key::from(&value)
            }
            _ => Key::Str(s.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }

    /// Upper-case string keys; other keys are returned unchanged.
    pub fn to_uppercase(&self) -> Key {
        match self {
            Key::Str(s) => Key::Str(s.to_uppercase()),
            other => other.clone(),
        }
    }

    /// Lower-case string keys; other keys are returned unchanged.
    pub fn to_lowercase(&self) -> Key {
        match self {
            Key::Str(s) => Key::Str(s.to_lowercase()),
            other => other.clone(),
        }
    }

    /// Trim surrounding whitespace from string keys.
    pub fn trimmed(&self) -> Key {
        match self {
            Key::Str(s) => Key::Str(s.trim().to_string()),
            other => other.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Bool(_) => 1,
            Key::Int(_) | Key::Float(_) => 2,
            Key::Str(_) => 3,
        }
    }
}

/// Canonical value so that `-0.0 == 0.0` and all NaNs are one key.
fn canonical(f: f64) -> f64 {
    if f.is_nan() {
        f64::NAN
    } else if f == 0.0 {
        0.0
    } else {
        f
    }
}

fn float_bits(f: f64) -> u64 {
    canonical(f).to_bits()
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Null, Key::Null) => true,
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Float(a), Key::Float(b)) => float_bits(*a) == float_bits(*b),
            (Key::Str(a), Key::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::Null => {}
            Key::Bool(b) => b.hash(state),
            Key::Int(i) => i.hash(state),
            Key::Float(f) => float_bits(*f).hash(state),
            Key::Str(s) => s.hash(state),
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Null, Key::Null) => Ordering::Equal,
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => canonical(*a).total_cmp(&canonical(*b)),
            // Int and Float never compare equal: that would disagree with Eq.
            (Key::Int(a), Key::Float(b)) => match (*a as f64).total_cmp(&canonical(*b)) {
                Ordering::Equal => Ordering::Less,
                ord => ord,
            },
            (Key::Float(a), Key::Int(b)) => match canonical(*a).total_cmp(&(*b as f64)) {
                Ordering::Equal => Ordering::Greater,
                ord => ord,
            },
            (Key::Str(a), Key::Str(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::Float(x) => write!(f, "{}", x),
            Key::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Str(s.clone())
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i as i64)
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Key::Int(i as i64)
    }
}

impl From<f64> for Key {
    fn from(f: f64) -> Self {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            Key::Int(f as i64)
        } else {
            Key::Float(f)
        }
    }
}

impl<T: Into<Key>> From<Option<T>> for Key {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Key::Null)
    }
}

impl From<&Value> for Key {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Key::Null,
            Value::Bool(b) => Key::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Key::Int(i),
                None => Key::from(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Key::Str(s.clone()),
            other => Key::Str(other.to_string()),
        }
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Key::Str(s),
            other => Key::from(&other),
        }
    }
}

/// Read access to named fields of a record.
///
/// Path-based extractors and sort specifications go through this trait.
/// Paths are dotted (`"Info.Name"`); implementations for flat structs can
/// simply match on the field name.
pub trait Document {
    /// Resolve `path` to a key, or `None` when the path does not exist.
    fn resolve(&self, path: &str) -> Option<Key>;
}

impl Document for Value {
    fn resolve(&self, path: &str) -> Option<Key> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(Key::from(current))
    }
}

impl<D: Document + ?Sized> Document for std::sync::Arc<D> {
    fn resolve(&self, path: &str) -> Option<Key> {
        (**self).resolve(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_integral_float_is_int() {
        assert_eq!(Key::from(5.0), Key::Int(5));
        assert_eq!(Key::from(5.5), Key::Float(5.5));
        assert_eq!(Key::from(&json!(3.0)), Key::Int(3));
    }

    #[test]
    fn test_float_equality_is_canonical() {
        assert_eq!(Key::Float(-0.0), Key::Float(0.0));
        assert_eq!(Key::Float(f64::NAN), Key::Float(f64::NAN));

        let mut set = HashSet::new();
        set.insert(Key::Float(f64::NAN));
        set.insert(Key::Float(-f64::NAN));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_nan_ordering_agrees_with_equality() {
        let nan = Key::Float(f64::NAN);
        let negative_nan = Key::Float(-f64::NAN);
        assert_eq!(nan.cmp(&negative_nan), Ordering::Equal);
        assert_eq!(Key::Float(-0.0).cmp(&Key::Float(0.0)), Ordering::Equal);
        assert!(negative_nan > Key::Float(f64::INFINITY));
        assert!(negative_nan > Key::Int(i64::MAX));
        assert!(Key::Int(0) < negative_nan);

        let mut keys = vec![negative_nan.clone(), Key::Int(1), nan.clone(), Key::Float(-1.5)];
        keys.sort();
        assert_eq!(keys[..2], [Key::Float(-1.5), Key::Int(1)]);
        assert!(keys[2..].iter().all(|k| *k == nan));
    }

    #[test]
    fn test_ordering_across_kinds() {
        let mut keys = vec![
            Key::from("b"),
            Key::Int(10),
            Key::Null,
            Key::Float(2.5),
            Key::Bool(true),
            Key::from("a"),
            Key::Int(-3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Null,
                Key::Bool(true),
                Key::Int(-3),
                Key::Float(2.5),
                Key::Int(10),
                Key::from("a"),
                Key::from("b"),
            ]
        );
    }

    #[test]
    fn test_resolve_nested_path() {
        let record = json!({"PID": 1, "Info": {"Name": "Alan", "Tags": ["x", "y"]}});
        assert_eq!(record.resolve("Info.Name"), Some(Key::from("Alan")));
        assert_eq!(record.resolve("Info.Tags.1"), Some(Key::from("y")));
        assert_eq!(record.resolve("PID"), Some(Key::Int(1)));
        assert_eq!(record.resolve("Info.Missing"), None);
        assert_eq!(record.resolve("PID.Deeper"), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Key::parse("42"), Key::Int(42));
        assert_eq!(Key::parse("true"), Key::Bool(true));
        assert_eq!(Key::parse("carl"), Key::from("carl"));
        assert_eq!(Key::parse("\"42\""), Key::from("42"));
        assert_eq!(Key::parse("[1,2]"), Key::from("[1,2]"));
    }

    #[test]
    fn test_case_folding_leaves_non_strings() {
        assert_eq!(Key::from("Carl").to_uppercase(), Key::from("CARL"));
        assert_eq!(Key::Int(7).to_lowercase(), Key::Int(7));
        assert_eq!(Key::from("  x ").trimmed(), Key::from("x"));
    }
}
