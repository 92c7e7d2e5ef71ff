//! # Indexed Memory
//!
//! Secondary indices over an in-memory record collection.
//!
//! This library provides:
//! - Unique indices (key to one record, last write wins)
//! - Group indices (key to an ordered list of records, optionally sorted)
//! - Key normalizers applied at build time and at lookup time
//! - Eager or lazy rebuilds, with bulk operations that rebuild once
//! - Live filtered views carrying their own indices
//!
//! ## Example
//!
//! ```rust
//! use indexed_memory::extract::normalize;
//! use indexed_memory::{IndexDefinition, IndexOptions, IndexedCollection, MemoryStore, SortBy};
//! use serde_json::{json, Value};
//!
//! let people = IndexedCollection::new(
//!     MemoryStore::<Value>::keyed_by("PID"),
//!     vec![
//!         IndexDefinition::unique("Name")
//!             .path("Info.Name")
//!             .normalizer(normalize::uppercase()),
//!         IndexDefinition::group("Gender").sort(SortBy::path("-PID")),
//!     ],
//!     IndexOptions::lazy(),
//! )
//! .unwrap();
//!
//! people
//!     .add_bulk(vec![
//!         json!({"PID": 1, "Info": {"Name": "Alan"}, "Gender": "M"}),
//!         json!({"PID": 2, "Info": {"Name": "Beth"}, "Gender": "F"}),
//!         json!({"PID": 3, "Info": {"Name": "Carl"}, "Gender": "M"}),
//!     ])
//!     .unwrap();
//!
//! let beth = people.get_one("Name", "beth").unwrap().unwrap();
//! assert_eq!(beth["PID"], 2);
//!
//! let men = people.get_group("Gender", "M").unwrap();
//! assert_eq!(men[0]["PID"], 3);
//! ```

pub mod accessor;
pub mod builder;
pub mod collection;
pub mod config;
pub mod definition;
pub mod error;
pub mod extract;
pub mod key;
pub mod metrics;
pub mod scheduler;
pub mod store;

pub use accessor::Accessor;
pub use builder::{CompiledIndex, Entry};
pub use collection::{IndexedCollection, ListenerId, RebuildEvent};
pub use config::{CollectionConfig, IndexOptions, IndexSpec};
pub use definition::{IndexDefinition, IndexKind};
pub use error::{IndexError, Result};
pub use extract::{Extractor, SortBy};
pub use key::{Document, Key};
pub use metrics::RebuildStats;
pub use scheduler::{RebuildMode, RebuildState};
pub use store::{Change, Collection, MemoryStore, SubscriptionId};
