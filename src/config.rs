//! Collection configuration loaded from JSON

use crate::definition::IndexDefinition;
use crate::error::{IndexError, Result};
use crate::extract::{normalize, parse_sort_spec};
use crate::key::Document;
use crate::scheduler::RebuildMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for building an indexed collection programmatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Defer rebuilds until the next index read.
    pub lazy: bool,
}

impl IndexOptions {
    pub fn eager() -> Self {
        Self { lazy: false }
    }

    pub fn lazy() -> Self {
        Self { lazy: true }
    }

    pub fn mode(&self) -> RebuildMode {
        RebuildMode::from_lazy(self.lazy)
    }
}

/// One index as written in a configuration file.
///
/// ```json
/// { "field": "Country", "type": "group", "key": "Country",
///   "normalizer": "uppercase", "sort": "-PID" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    /// `"unique"` (alias `"index"`) or `"group"`; unique when absent.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Dotted path to the key; the field name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,
    /// Dotted path to sort groups by; a leading `-` sorts descending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

fn default_kind() -> String {
    "unique".to_string()
}

impl IndexSpec {
    pub fn new(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: kind.into(),
            key: None,
            normalizer: None,
            sort: None,
        }
    }

    /// Validate the entry and turn it into a typed definition.
    pub fn to_definition<R: Document + 'static>(&self) -> Result<IndexDefinition<R>> {
        let mut def = IndexDefinition::with_kind_name(self.field.clone(), &self.kind)?;
        if let Some(key) = &self.key {
            def = def.path(key.clone());
        }
        if let Some(name) = &self.normalizer {
            def = def.normalizer(normalize::by_name(name)?);
        }
        if let Some(sort) = &self.sort {
            def = def.sort(parse_sort_spec(sort)?);
        }
        Ok(def)
    }
}

/// Everything needed to build an indexed collection from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Path to the identity of each record.
    #[serde(default = "default_id_property")]
    pub id_property: String,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub indices: Vec<IndexSpec>,
}

fn default_id_property() -> String {
    "id".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            id_property: default_id_property(),
            lazy: false,
            indices: Vec::new(),
        }
    }
}

impl CollectionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CollectionConfig = serde_json::from_str(json)?;
        if config.id_property.is_empty() {
            return Err(IndexError::ConfigError("id_property must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn options(&self) -> IndexOptions {
        IndexOptions { lazy: self.lazy }
    }

    /// Typed definitions for every configured index, in order.
    pub fn definitions<R: Document + 'static>(&self) -> Result<Vec<IndexDefinition<R>>> {
        self.indices.iter().map(|spec| spec.to_definition::<R>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::IndexKind;
    use serde_json::Value;
    use std::io::Write;

    const PEOPLE: &str = r#"{
        "id_property": "PID",
        "lazy": true,
        "indices": [
            { "field": "Name", "key": "Info.Name", "normalizer": "uppercase" },
            { "field": "Gender", "type": "group", "sort": "Info.Name" },
            { "field": "Country", "type": "group", "normalizer": "upper", "sort": "-PID" }
        ]
    }"#;

    #[test]
    fn test_parse_config() {
        let config = CollectionConfig::from_json_str(PEOPLE).unwrap();
        assert_eq!(config.id_property, "PID");
        assert!(config.options().lazy);
        assert_eq!(config.indices.len(), 3);
        assert_eq!(config.indices[0].kind, "unique");

        let defs = config.definitions::<Value>().unwrap();
        assert_eq!(defs[0].kind(), IndexKind::Unique);
        assert_eq!(defs[1].kind(), IndexKind::Group);
        assert_eq!(defs[2].field(), "Country");
    }

    #[test]
    fn test_defaults() {
        let config = CollectionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CollectionConfig::default());
        assert!(!config.lazy);
    }

    #[test]
    fn test_invalid_kind_is_config_error() {
        let config = CollectionConfig::from_json_str(
            r#"{ "indices": [ { "field": "x", "type": "hash" } ] }"#,
        )
        .unwrap();
        let err = config.definitions::<Value>().unwrap_err();
        assert!(matches!(err, IndexError::InvalidIndexKind { ref kind } if kind == "hash"));
    }

    #[test]
    fn test_unknown_normalizer() {
        let spec = IndexSpec {
            normalizer: Some("soundex".to_string()),
            ..IndexSpec::new("name", "unique")
        };
        assert!(matches!(
            spec.to_definition::<Value>(),
            Err(IndexError::UnknownNormalizer { .. })
        ));
    }

    #[test]
    fn test_bad_sort_path() {
        let spec = IndexSpec {
            sort: Some("-".to_string()),
            ..IndexSpec::new("g", "group")
        };
        assert!(matches!(
            spec.to_definition::<Value>(),
            Err(IndexError::ConfigError(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CollectionConfig::from_json_str("{ not json"),
            Err(IndexError::SerializationError(_))
        ));
        assert!(matches!(
            CollectionConfig::from_json_str(r#"{ "id_property": "" }"#),
            Err(IndexError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PEOPLE.as_bytes()).unwrap();

        let config = CollectionConfig::load(file.path()).unwrap();
        assert_eq!(config.indices[2].sort.as_deref(), Some("-PID"));

        let missing = CollectionConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(IndexError::IoError(_))));
    }

    #[test]
    fn test_spec_roundtrip_omits_empty_options() {
        let json = serde_json::to_string(&IndexSpec::new("name", "unique")).unwrap();
        assert_eq!(json, r#"{"field":"name","type":"unique"}"#);
    }
}
