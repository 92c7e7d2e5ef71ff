//! Indexed collection
//!
//! [`IndexedCollection`] wraps a [`Collection`] and keeps one derived lookup
//! structure per index definition. The collection subscribes to its store
//! before anyone else can, so listeners registered later already observe
//! rebuilt indices when they are notified of a change.
//!
//! Rebuilds follow the configured [`RebuildMode`]. Bulk operations suppress
//! per-mutation rebuilds and settle with at most one rebuild (or one
//! invalidation in lazy mode) when the outermost bulk operation ends, even
//! when it ends early through an error or a panic.

use crate::accessor::{index_name, Accessor, AccessorTable};
use crate::builder::{CompiledIndex, Entry};
use crate::config::{CollectionConfig, IndexOptions};
use crate::definition::{compile_definitions, CompiledDefinition, IndexDefinition, IndexKind};
use crate::error::{IndexError, Result};
use crate::key::{Document, Key};
use crate::metrics::RebuildStats;
use crate::scheduler::{Action, RebuildMode, RebuildState, Scheduler};
use crate::store::{Change, Collection, SubscriptionId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Payload of the rebuilt notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildEvent {
    /// Records visible to the collection at rebuild time.
    pub records: usize,
    /// Number of indices rebuilt.
    pub indices: usize,
    /// Whether the rebuild ran because a stale index was read.
    pub on_read: bool,
}

pub type RebuiltListener = Rc<dyn Fn(&RebuildEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registry<R> {
    indices: Vec<Rc<CompiledIndex<R>>>,
    stale: bool,
}

struct Inner<S: Collection> {
    store: S,
    definitions: Rc<Vec<CompiledDefinition<S::Record>>>,
    accessors: Rc<AccessorTable<S::Record>>,
    options: IndexOptions,
    registry: RefCell<Registry<S::Record>>,
    scheduler: RefCell<Scheduler>,
    stats: RefCell<RebuildStats>,
    listeners: RefCell<Vec<(ListenerId, RebuiltListener)>>,
    next_listener: Cell<u64>,
    views: RefCell<Vec<Weak<Inner<S>>>>,
    subscription: Cell<Option<SubscriptionId>>,
}

impl<S: Collection> Inner<S> {
    fn on_store_change(&self) {
        let action = self.scheduler.borrow_mut().on_mutation();
        self.stats
            .borrow_mut()
            .record_mutation(action == Action::Suppressed);
        self.apply(action);
    }

    fn apply(&self, action: Action) {
        match action {
            Action::Rebuild => self.rebuild(false),
            Action::Invalidate => self.mark_stale(),
            Action::Suppressed => {
                trace!(target: "indexed_memory::rebuild", "Rebuild deferred until bulk operation ends");
            }
            Action::Nothing => {}
        }
    }

    fn mark_stale(&self) {
        self.registry.borrow_mut().stale = true;
        self.stats.borrow_mut().record_invalidation();
        trace!(target: "indexed_memory::rebuild", "Indices invalidated");
    }

    fn is_stale(&self) -> bool {
        self.registry.borrow().stale
    }

    fn rebuild(&self, on_read: bool) {
        // Stays set if a key or sort function unwinds mid-build.
        self.registry.borrow_mut().stale = true;

        let started = Instant::now();
        let records = self.store.fetch_all();
        let indices: Vec<Rc<CompiledIndex<S::Record>>> = self
            .definitions
            .iter()
            .map(|def| Rc::new(def.build(&records)))
            .collect();

        {
            let mut registry = self.registry.borrow_mut();
            registry.indices = indices;
            registry.stale = false;
        }
        self.scheduler.borrow_mut().mark_clean();

        let elapsed = started.elapsed();
        self.stats.borrow_mut().record_rebuild(elapsed, on_read);
        debug!(
            target: "indexed_memory::rebuild",
            records = records.len(),
            indices = self.definitions.len(),
            on_read,
            elapsed_us = elapsed.as_micros() as u64,
            "Indices rebuilt"
        );

        self.emit_rebuilt(&RebuildEvent {
            records: records.len(),
            indices: self.definitions.len(),
            on_read,
        });
    }

    fn ensure_fresh(&self) {
        let stale = self.is_stale();
        if stale {
            self.rebuild(true);
        }
    }

    fn emit_rebuilt(&self, event: &RebuildEvent) {
        let targets: Vec<RebuiltListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in targets {
            listener(event);
        }
    }

    fn live_views(&self) -> Vec<Rc<Inner<S>>> {
        let mut views = self.views.borrow_mut();
        views.retain(|view| view.strong_count() > 0);
        views.iter().filter_map(Weak::upgrade).collect()
    }

    fn begin_bulk(&self) {
        self.scheduler.borrow_mut().begin_bulk();
        self.stats.borrow_mut().record_bulk();
        for view in self.live_views() {
            view.begin_bulk();
        }
    }

    fn end_bulk(&self, panicking: bool) {
        let action = self.scheduler.borrow_mut().end_bulk();
        match action {
            None => {
                warn!(target: "indexed_memory::collection", "Bulk operation ended without a matching begin");
            }
            Some(Action::Rebuild) if panicking => {
                warn!(target: "indexed_memory::collection", "Bulk operation unwound; indices invalidated");
                self.mark_stale();
            }
            Some(action) => self.apply(action),
        }

        for view in self.live_views() {
            view.end_bulk(panicking);
        }
    }
}

impl<S: Collection> Drop for Inner<S> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.store.unsubscribe(id);
        }
    }
}

/// Ends a bulk operation when dropped, including during unwinding.
struct BulkGuard<'a, S: Collection> {
    inner: &'a Inner<S>,
}

impl<'a, S: Collection> BulkGuard<'a, S> {
    fn begin(inner: &'a Inner<S>) -> Self {
        inner.begin_bulk();
        BulkGuard { inner }
    }
}

impl<S: Collection> Drop for BulkGuard<'_, S> {
    fn drop(&mut self) {
        self.inner.end_bulk(std::thread::panicking());
    }
}

/// A collection with secondary indices kept in step with its records.
///
/// Cloning yields another handle onto the same collection and registry.
///
/// ```
/// use indexed_memory::{Collection, IndexDefinition, IndexOptions, IndexedCollection, MemoryStore};
/// use serde_json::{json, Value};
///
/// let store: MemoryStore<Value> = MemoryStore::keyed_by("id");
/// let people = IndexedCollection::new(
///     store,
///     vec![
///         IndexDefinition::unique("name"),
///         IndexDefinition::group("country"),
///     ],
///     IndexOptions::eager(),
/// )
/// .unwrap();
///
/// people.add(json!({"id": 1, "name": "Ada", "country": "UK"})).unwrap();
/// people.add(json!({"id": 2, "name": "Linus", "country": "FI"})).unwrap();
///
/// assert!(people.get_one("name", "Ada").unwrap().is_some());
/// assert_eq!(people.get_group("country", "FI").unwrap().len(), 1);
/// assert_eq!(people.store().len(), 2);
/// ```
pub struct IndexedCollection<S: Collection> {
    inner: Rc<Inner<S>>,
}

impl<S: Collection> Clone for IndexedCollection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Collection> fmt::Debug for IndexedCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedCollection")
            .field("indices", &self.inner.accessors.fields().collect::<Vec<_>>())
            .field("lazy", &self.inner.options.lazy)
            .field("state", &self.scheduler_state())
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl<S: Collection> IndexedCollection<S>
where
    S::Record: Document,
{
    /// Wrap `store` with the given indices.
    ///
    /// Definitions are validated up front; an invalid one fails construction
    /// and leaves the store untouched. In eager mode every index is built
    /// before this returns.
    pub fn new(
        store: S,
        definitions: Vec<IndexDefinition<S::Record>>,
        options: IndexOptions,
    ) -> Result<Self> {
        let compiled = compile_definitions(definitions)?;
        let accessors = AccessorTable::new(&compiled)?;
        let collection = Self::assemble(store, Rc::new(compiled), Rc::new(accessors), options);

        info!(
            target: "indexed_memory::collection",
            indices = collection.inner.definitions.len(),
            records = collection.inner.store.len(),
            lazy = options.lazy,
            "Indexed collection created"
        );
        Ok(collection)
    }

    pub fn from_config(store: S, config: &CollectionConfig) -> Result<Self> {
        Self::new(store, config.definitions()?, config.options())
    }
}

impl<S: Collection> IndexedCollection<S> {
    fn assemble(
        store: S,
        definitions: Rc<Vec<CompiledDefinition<S::Record>>>,
        accessors: Rc<AccessorTable<S::Record>>,
        options: IndexOptions,
    ) -> Self {
        let indices = definitions
            .iter()
            .map(|def| Rc::new(CompiledIndex::empty(def.kind)))
            .collect();

        let inner = Rc::new(Inner {
            store,
            definitions,
            accessors,
            options,
            registry: RefCell::new(Registry {
                indices,
                stale: true,
            }),
            scheduler: RefCell::new(Scheduler::new(options.mode())),
            stats: RefCell::new(RebuildStats::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            views: RefCell::new(Vec::new()),
            subscription: Cell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let id = inner.store.subscribe(Rc::new(move |_change: &Change<S::Record>| {
            if let Some(inner) = weak.upgrade() {
                inner.on_store_change();
            }
        }));
        inner.subscription.set(Some(id));

        if options.mode() == RebuildMode::Eager {
            inner.rebuild(false);
        }

        Self { inner }
    }

    /// The wrapped store handle.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn options(&self) -> IndexOptions {
        self.inner.options
    }

    pub fn get(&self, id: impl Into<Key>) -> Option<Arc<S::Record>> {
        self.inner.store.get(&id.into())
    }

    pub fn fetch_all(&self) -> Vec<Arc<S::Record>> {
        self.inner.store.fetch_all()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn add(&self, record: S::Record) -> Result<Arc<S::Record>> {
        self.inner.store.add(record)
    }

    pub fn put(&self, record: S::Record) -> Result<Arc<S::Record>> {
        self.inner.store.put(record)
    }

    pub fn remove(&self, id: impl Into<Key>) -> Result<Option<Arc<S::Record>>> {
        self.inner.store.remove(&id.into())
    }

    /// Replace every record. Indices follow the rebuild policy.
    pub fn set_data(&self, records: Vec<S::Record>) -> Result<()> {
        self.inner.store.set_data(records)
    }

    /// Add many records with a single rebuild at the end.
    ///
    /// Stops at the first failing record; records added before it stay and
    /// are indexed.
    pub fn add_bulk<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = S::Record>,
    {
        let _guard = BulkGuard::begin(&self.inner);
        for record in records {
            self.inner.store.add(record)?;
        }
        Ok(())
    }

    /// Insert or replace many records with a single rebuild at the end.
    pub fn put_bulk<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = S::Record>,
    {
        let _guard = BulkGuard::begin(&self.inner);
        for record in records {
            self.inner.store.put(record)?;
        }
        Ok(())
    }

    /// Remove many records with a single rebuild at the end. Returns how many
    /// ids were present.
    pub fn remove_bulk<I, K>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let _guard = BulkGuard::begin(&self.inner);
        let mut removed = 0;
        for id in ids {
            if self.inner.store.remove(&id.into())?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run `f` as one bulk operation. Nested calls join the outer operation.
    ///
    /// Reads inside `f` see the indices as they were when the bulk operation
    /// began, unless `f` calls [`rebuild_indices`](Self::rebuild_indices).
    pub fn bulk<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let _guard = BulkGuard::begin(&self.inner);
        f(self)
    }

    /// The current structure of the index for `field`.
    ///
    /// The returned snapshot does not change; later rebuilds replace the
    /// registry entry rather than mutating it.
    pub fn index(&self, field: &str) -> Result<Rc<CompiledIndex<S::Record>>> {
        let slot = self.inner.accessors.slot_for_field(field)?;
        Ok(self.index_at(slot))
    }

    /// Look up an index by its exposed name, e.g. `byName`.
    pub fn index_named(&self, name: &str) -> Result<Rc<CompiledIndex<S::Record>>> {
        let slot = self.inner.accessors.slot_for_index_name(name)?;
        Ok(self.index_at(slot))
    }

    /// The generated accessor registered as `name`, e.g. `getByName`.
    pub fn accessor(&self, name: &str) -> Result<Accessor<'_, S>> {
        let slot = self
            .inner
            .accessors
            .slot_for_name(name)
            .ok_or_else(|| IndexError::UnknownAccessor {
                name: name.to_string(),
            })?;
        Ok(Accessor {
            collection: self,
            slot,
        })
    }

    /// The generated accessor for `field`.
    pub fn accessor_for(&self, field: &str) -> Result<Accessor<'_, S>> {
        let slot = self.inner.accessors.slot_for_field(field)?;
        Ok(Accessor {
            collection: self,
            slot,
        })
    }

    /// Look up `key` in the index for `field`, normalizing it first.
    ///
    /// Unique indices yield [`Entry::One`] or `None`; group indices always
    /// yield [`Entry::Many`], empty when nothing matches.
    pub fn get_by(&self, field: &str, key: impl Into<Key>) -> Result<Option<Entry<S::Record>>> {
        let slot = self.inner.accessors.slot_for_field(field)?;
        Ok(self.lookup_slot(slot, key.into()))
    }

    pub fn get_one(&self, field: &str, key: impl Into<Key>) -> Result<Option<Arc<S::Record>>> {
        let slot = self.slot_of_kind(field, IndexKind::Unique)?;
        Ok(self.lookup_slot(slot, key.into()).and_then(Entry::into_one))
    }

    pub fn get_group(&self, field: &str, key: impl Into<Key>) -> Result<Vec<Arc<S::Record>>> {
        let slot = self.slot_of_kind(field, IndexKind::Group)?;
        Ok(self
            .lookup_slot(slot, key.into())
            .map(Entry::into_many)
            .unwrap_or_default())
    }

    fn slot_of_kind(&self, field: &str, expected: IndexKind) -> Result<usize> {
        let slot = self.inner.accessors.slot_for_field(field)?;
        let actual = self.inner.accessors.entry(slot).kind;
        if actual != expected {
            return Err(IndexError::IndexKindMismatch {
                field: field.to_string(),
                expected: expected.name(),
                actual: actual.name(),
            });
        }
        Ok(slot)
    }

    fn index_at(&self, slot: usize) -> Rc<CompiledIndex<S::Record>> {
        self.inner.ensure_fresh();
        Rc::clone(&self.inner.registry.borrow().indices[slot])
    }

    pub(crate) fn lookup_slot(&self, slot: usize, key: Key) -> Option<Entry<S::Record>> {
        let index = self.index_at(slot);
        let lookup = Rc::clone(&self.inner.accessors.entry(slot).lookup);
        lookup(&index, key)
    }

    pub(crate) fn accessors(&self) -> &AccessorTable<S::Record> {
        &self.inner.accessors
    }

    /// Fields with an index, in definition order.
    pub fn index_fields(&self) -> Vec<&str> {
        self.inner.accessors.fields().collect()
    }

    /// Generated accessor names, in definition order.
    pub fn accessor_names(&self) -> Vec<&str> {
        self.inner.accessors.names().collect()
    }

    /// Exposed index names (`by<Field>`), in definition order.
    pub fn index_names(&self) -> Vec<String> {
        self.inner.accessors.fields().map(index_name).collect()
    }

    /// Rebuild every index now, regardless of mode or bulk state.
    pub fn rebuild_indices(&self) {
        self.inner.rebuild(false);
    }

    /// Apply the rebuild policy as if the records had changed: rebuild now in
    /// eager mode, mark stale in lazy mode, defer while a bulk operation is
    /// active.
    pub fn invalidate_indices(&self) {
        self.inner.on_store_change();
    }

    /// Register a listener fired once after every rebuild.
    pub fn on_rebuilt<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RebuildEvent) + 'static,
    {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        let listener: RebuiltListener = Rc::new(listener);
        self.inner.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn off_rebuilt(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.inner.listeners.borrow_mut();
            listeners
                .iter()
                .position(|(existing, _)| *existing == id)
                .map(|pos| listeners.remove(pos))
        };
        removed.is_some()
    }

    /// Subscribe to changes of the underlying store.
    ///
    /// The listener runs after this collection has processed the change, so
    /// in eager mode it already sees rebuilt indices. A listener that owns a
    /// handle to this collection keeps it alive until unsubscribed.
    pub fn on_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Change<S::Record>) + 'static,
    {
        self.inner.store.subscribe(Rc::new(listener))
    }

    pub fn off_change(&self, id: SubscriptionId) -> bool {
        self.inner.store.unsubscribe(id)
    }

    pub fn stats(&self) -> RebuildStats {
        self.inner.stats.borrow().clone()
    }

    pub fn scheduler_state(&self) -> RebuildState {
        self.inner.scheduler.borrow().state()
    }

    pub fn is_bulk_active(&self) -> bool {
        self.inner.scheduler.borrow().in_bulk()
    }

    /// Whether the next index read will rebuild first.
    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// A live indexed view over the records matching `predicate`.
    ///
    /// The view carries the same index definitions with its own registry and
    /// follows this collection's bulk operations.
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&S::Record) -> bool + 'static,
    {
        let store = self.inner.store.filter(Rc::new(predicate));
        let view = Self::assemble(
            store,
            Rc::clone(&self.inner.definitions),
            Rc::clone(&self.inner.accessors),
            self.inner.options,
        );

        let depth = self.inner.scheduler.borrow().depth();
        for _ in 0..depth {
            view.inner.begin_bulk();
        }
        self.inner.views.borrow_mut().push(Rc::downgrade(&view.inner));

        debug!(
            target: "indexed_memory::collection",
            records = view.len(),
            "Filtered view created"
        );
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn people(lazy: bool) -> IndexedCollection<MemoryStore<Value>> {
        let store = MemoryStore::keyed_by("id");
        IndexedCollection::new(
            store,
            vec![
                IndexDefinition::unique("name"),
                IndexDefinition::group("team"),
            ],
            IndexOptions { lazy },
        )
        .unwrap()
    }

    fn rebuild_counter(c: &IndexedCollection<MemoryStore<Value>>) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        c.on_rebuilt(move |_| seen.set(seen.get() + 1));
        count
    }

    #[test]
    fn test_eager_rebuilds_per_mutation() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);

        c.add(json!({"id": 1, "name": "a", "team": "x"})).unwrap();
        c.add(json!({"id": 2, "name": "b", "team": "x"})).unwrap();

        assert_eq!(rebuilt.get(), 2);
        assert!(!c.is_stale());
        assert_eq!(c.get_group("team", "x").unwrap().len(), 2);
    }

    #[test]
    fn test_lazy_rebuilds_on_read() {
        let c = people(true);
        let rebuilt = rebuild_counter(&c);
        assert!(c.is_stale());

        c.add(json!({"id": 1, "name": "a", "team": "x"})).unwrap();
        c.add(json!({"id": 2, "name": "b", "team": "y"})).unwrap();
        assert_eq!(rebuilt.get(), 0);

        assert!(c.get_one("name", "b").unwrap().is_some());
        assert!(c.get_one("name", "a").unwrap().is_some());
        assert_eq!(rebuilt.get(), 1);
        assert_eq!(c.stats().on_read_rebuilds(), 1);
    }

    #[test]
    fn test_bulk_rebuilds_once() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);

        c.add_bulk((0..10).map(|i| json!({"id": i, "name": format!("n{}", i), "team": "t"})))
            .unwrap();

        assert_eq!(rebuilt.get(), 1);
        assert_eq!(c.scheduler_state(), RebuildState::Idle);
        assert_eq!(c.get_group("team", "t").unwrap().len(), 10);
        assert_eq!(c.stats().suppressed_mutations(), 10);
    }

    #[test]
    fn test_empty_bulk_does_not_rebuild() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);
        c.add_bulk(Vec::new()).unwrap();
        assert_eq!(c.remove_bulk(vec![42]).unwrap(), 0);
        assert_eq!(rebuilt.get(), 0);
    }

    #[test]
    fn test_nested_bulk_joins_outer() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);

        c.bulk(|c| {
            c.add(json!({"id": 1, "name": "a", "team": "x"}))?;
            c.add_bulk(vec![json!({"id": 2, "name": "b", "team": "x"})])?;
            assert_eq!(c.scheduler_state(), RebuildState::BulkActiveDirty);
            Ok(())
        })
        .unwrap();

        assert_eq!(rebuilt.get(), 1);
        assert_eq!(c.scheduler_state(), RebuildState::Idle);
    }

    #[test]
    fn test_reads_inside_bulk_see_previous_state() {
        let c = people(false);
        c.bulk(|c| {
            c.add(json!({"id": 1, "name": "a", "team": "x"}))?;
            assert!(c.get_one("name", "a")?.is_none());
            Ok(())
        })
        .unwrap();
        assert!(c.get_one("name", "a").unwrap().is_some());
    }

    #[test]
    fn test_failing_bulk_still_settles() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);

        let result = c.add_bulk(vec![
            json!({"id": 1, "name": "a", "team": "x"}),
            json!({"id": 1, "name": "dup", "team": "x"}),
            json!({"id": 2, "name": "b", "team": "x"}),
        ]);

        assert!(matches!(result, Err(IndexError::DuplicateId { .. })));
        assert_eq!(c.scheduler_state(), RebuildState::Idle);
        assert_eq!(rebuilt.get(), 1);
        assert!(c.get_one("name", "a").unwrap().is_some());
        assert!(c.get_one("name", "b").unwrap().is_none());
    }

    #[test]
    fn test_panicking_bulk_invalidates() {
        let c = people(false);
        let rebuilt = rebuild_counter(&c);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = c.bulk(|c| -> Result<()> {
                c.add(json!({"id": 1, "name": "a", "team": "x"}))?;
                panic!("boom");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(c.scheduler_state(), RebuildState::Idle);
        assert!(c.is_stale());
        assert_eq!(rebuilt.get(), 0);

        assert!(c.get_one("name", "a").unwrap().is_some());
        assert_eq!(rebuilt.get(), 1);
    }

    #[test]
    fn test_panicking_key_fn_leaves_indices_stale() {
        let store: MemoryStore<Value> = MemoryStore::keyed_by("id");
        let c = IndexedCollection::new(
            store,
            vec![IndexDefinition::group("team").key_fn(|r: &Value| {
                if r["boom"] == true {
                    panic!("unreadable team");
                }
                r["team"].as_str().unwrap_or("").to_string()
            })],
            IndexOptions::eager(),
        )
        .unwrap();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = c.add(json!({"id": 1, "team": "x", "boom": true}));
        }));

        assert!(outcome.is_err());
        assert_eq!(c.len(), 1);
        assert!(c.is_stale());

        c.put(json!({"id": 1, "team": "x"})).unwrap();
        assert!(!c.is_stale());
        assert_eq!(c.get_group("team", "x").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_field_and_kind_mismatch() {
        let c = people(false);
        assert!(matches!(
            c.get_by("age", 3),
            Err(IndexError::UnknownIndex { .. })
        ));
        assert!(matches!(
            c.accessor("getByAge"),
            Err(IndexError::UnknownAccessor { .. })
        ));
        assert!(matches!(
            c.get_group("name", "a"),
            Err(IndexError::IndexKindMismatch { expected: "group", actual: "unique", .. })
        ));
    }

    #[test]
    fn test_accessor_sees_later_rebuilds() {
        let c = people(true);
        let by_name = c.accessor("getByName").unwrap();
        assert_eq!(by_name.field(), "name");
        assert_eq!(by_name.kind(), IndexKind::Unique);
        assert!(by_name.get("a").is_none());

        c.add(json!({"id": 1, "name": "a", "team": "x"})).unwrap();
        assert!(by_name.get("a").is_some());
    }

    #[test]
    fn test_index_snapshot_is_replaced_not_mutated() {
        let c = people(false);
        c.add(json!({"id": 1, "name": "a", "team": "x"})).unwrap();
        let before = c.index("name").unwrap();

        c.add(json!({"id": 2, "name": "b", "team": "x"})).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(c.index_named("byName").unwrap().len(), 2);
    }

    #[test]
    fn test_dropped_collection_unsubscribes() {
        let store: MemoryStore<Value> = MemoryStore::keyed_by("id");
        let c = IndexedCollection::new(
            store.clone(),
            vec![IndexDefinition::unique("name")],
            IndexOptions::eager(),
        )
        .unwrap();
        drop(c);

        store.add(json!({"id": 1, "name": "a"})).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_view_follows_parent_bulk() {
        let c = people(false);
        let view = c.filter(|r: &Value| r["team"] == "x");
        let view_rebuilt = rebuild_counter(&view);

        c.add_bulk(vec![
            json!({"id": 1, "name": "a", "team": "x"}),
            json!({"id": 2, "name": "b", "team": "y"}),
            json!({"id": 3, "name": "c", "team": "x"}),
        ])
        .unwrap();

        assert_eq!(view_rebuilt.get(), 1);
        assert_eq!(view.len(), 2);
        assert!(view.get_one("name", "b").unwrap().is_none());
        assert_eq!(view.get_group("team", "x").unwrap().len(), 2);
    }

    #[test]
    fn test_view_created_inside_bulk() {
        let c = people(false);
        c.bulk(|c| {
            let view = c.filter(|r: &Value| r["team"] == "x");
            assert!(view.is_bulk_active());
            c.add(json!({"id": 1, "name": "a", "team": "x"}))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(c.scheduler_state(), RebuildState::Idle);
    }
}
