//! In-memory record storage with change subscriptions

use crate::error::{IndexError, Result};
use crate::key::{Document, Key};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// A mutation applied to a store, delivered to subscribers after it is applied.
#[derive(Debug, PartialEq)]
pub enum Change<R> {
    Added(Arc<R>),
    Updated { previous: Arc<R>, current: Arc<R> },
    Removed(Arc<R>),
    /// The whole record set was replaced.
    Reset,
}

impl<R> Change<R> {
    /// Whether a subscriber scoped by `predicate` should see this change.
    fn touches(&self, predicate: &Predicate<R>) -> bool {
        match self {
            Change::Added(record) | Change::Removed(record) => predicate(&**record),
            Change::Updated { previous, current } => {
                predicate(&**previous) || predicate(&**current)
            }
            Change::Reset => true,
        }
    }
}

pub type Listener<R> = Rc<dyn Fn(&Change<R>)>;
pub type Predicate<R> = Rc<dyn Fn(&R) -> bool>;
pub type IdFn<R> = Rc<dyn Fn(&R) -> Key>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The capabilities the indexing layer needs from a record collection.
///
/// Mutations notify subscribers with a [`Change`] once the record set
/// reflects them. Implementations are cheap handles: cloning one yields
/// another handle onto the same records.
pub trait Collection: Clone + 'static {
    type Record: 'static;

    /// All visible records in iteration order.
    fn fetch_all(&self) -> Vec<Arc<Self::Record>>;

    fn get(&self, id: &Key) -> Option<Arc<Self::Record>>;

    /// Insert a record whose id is not yet present.
    fn add(&self, record: Self::Record) -> Result<Arc<Self::Record>>;

    /// Insert or replace a record.
    fn put(&self, record: Self::Record) -> Result<Arc<Self::Record>>;

    /// Remove a record, returning it. Unknown ids are not an error.
    fn remove(&self, id: &Key) -> Result<Option<Arc<Self::Record>>>;

    /// Replace every record.
    fn set_data(&self, records: Vec<Self::Record>) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a change listener. Listeners run in subscription order.
    fn subscribe(&self, listener: Listener<Self::Record>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// A handle restricted to records matching `predicate`.
    fn filter(&self, predicate: Predicate<Self::Record>) -> Self;
}

struct Records<R> {
    items: Vec<Arc<R>>,
    ids: Vec<Key>,
    positions: HashMap<Key, usize>,
}

impl<R> Records<R> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            ids: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn get(&self, id: &Key) -> Option<&Arc<R>> {
        self.positions.get(id).map(|&pos| &self.items[pos])
    }

    fn push(&mut self, id: Key, record: Arc<R>) {
        self.positions.insert(id.clone(), self.items.len());
        self.ids.push(id);
        self.items.push(record);
    }

    fn take(&mut self, id: &Key) -> Option<Arc<R>> {
        let pos = self.positions.remove(id)?;
        self.ids.remove(pos);
        let record = self.items.remove(pos);
        for (offset, moved) in self.ids[pos..].iter().enumerate() {
            if let Some(p) = self.positions.get_mut(moved) {
                *p = pos + offset;
            }
        }
        Some(record)
    }
}

struct Subscriber<R> {
    id: SubscriptionId,
    scope: Option<Predicate<R>>,
    listener: Listener<R>,
}

struct Shared<R> {
    records: RefCell<Records<R>>,
    subscribers: RefCell<Vec<Subscriber<R>>>,
    next_subscription: Cell<u64>,
    id_of: IdFn<R>,
}

/// In-memory record store.
///
/// Records keep insertion order; replacing a record through [`put`] moves it
/// to the end. A store created by [`filter`](Collection::filter) is a live
/// view: it shares the parent's records and only sees (and is only notified
/// about) records that match its predicate.
///
/// [`put`]: Collection::put
pub struct MemoryStore<R> {
    shared: Rc<Shared<R>>,
    scope: Option<Predicate<R>>,
}

impl<R: 'static> MemoryStore<R> {
    /// Create an empty store identifying records with `id_of`.
    pub fn new<K, F>(id_of: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + 'static,
    {
        MemoryStore {
            shared: Rc::new(Shared {
                records: RefCell::new(Records::new()),
                subscribers: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
                id_of: Rc::new(move |record: &R| id_of(record).into()),
            }),
            scope: None,
        }
    }

    /// Create an empty store identifying records by the value at `path`.
    pub fn keyed_by(path: impl Into<String>) -> Self
    where
        R: Document,
    {
        let path = path.into();
        Self::new(move |record: &R| record.resolve(&path).unwrap_or(Key::Null))
    }

    /// Load initial records.
    pub fn with_records(self, records: Vec<R>) -> Result<Self> {
        self.set_data(records)?;
        Ok(self)
    }

    pub fn id_of(&self, record: &R) -> Key {
        (self.shared.id_of)(record)
    }

    pub fn is_view(&self) -> bool {
        self.scope.is_some()
    }

    fn in_scope(&self, record: &R) -> bool {
        self.scope.as_ref().map_or(true, |p| p(record))
    }

    /// A view may only write records it can see.
    fn check_scope(&self, id: &Key, record: &R) -> Result<()> {
        if self.in_scope(record) {
            Ok(())
        } else {
            Err(IndexError::OutsideView { id: id.to_string() })
        }
    }

    fn emit(&self, change: Change<R>) {
        let targets: Vec<Listener<R>> = self
            .shared
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.scope.as_ref().map_or(true, |p| change.touches(p)))
            .map(|s| Rc::clone(&s.listener))
            .collect();

        trace!(target: "indexed_memory::store", listeners = targets.len(), "Emitting change");
        for listener in targets {
            listener(&change);
        }
    }
}

impl<R: 'static> Collection for MemoryStore<R> {
    type Record = R;

    fn fetch_all(&self) -> Vec<Arc<R>> {
        let records = self.shared.records.borrow();
        match &self.scope {
            None => records.items.clone(),
            Some(predicate) => records
                .items
                .iter()
                .filter(|r| predicate(&***r))
                .cloned()
                .collect(),
        }
    }

    fn get(&self, id: &Key) -> Option<Arc<R>> {
        let records = self.shared.records.borrow();
        let found = records.get(id).filter(|r| self.in_scope(r)).cloned();
        found
    }

    fn add(&self, record: R) -> Result<Arc<R>> {
        let id = self.id_of(&record);
        self.check_scope(&id, &record)?;
        let record = Arc::new(record);
        {
            let mut records = self.shared.records.borrow_mut();
            if records.positions.contains_key(&id) {
                return Err(IndexError::DuplicateId { id: id.to_string() });
            }
            records.push(id, Arc::clone(&record));
        }
        self.emit(Change::Added(Arc::clone(&record)));
        Ok(record)
    }

    fn put(&self, record: R) -> Result<Arc<R>> {
        let id = self.id_of(&record);
        self.check_scope(&id, &record)?;
        let record = Arc::new(record);
        let previous = {
            let mut records = self.shared.records.borrow_mut();
            if records.get(&id).map_or(false, |r| !self.in_scope(r)) {
                return Err(IndexError::OutsideView { id: id.to_string() });
            }
            let previous = records.take(&id);
            records.push(id, Arc::clone(&record));
            previous
        };
        let change = match previous {
            Some(previous) => Change::Updated {
                previous,
                current: Arc::clone(&record),
            },
            None => Change::Added(Arc::clone(&record)),
        };
        self.emit(change);
        Ok(record)
    }

    fn remove(&self, id: &Key) -> Result<Option<Arc<R>>> {
        let removed = {
            let mut records = self.shared.records.borrow_mut();
            let visible = records.get(id).map_or(false, |r| self.in_scope(r));
            if visible {
                records.take(id)
            } else {
                None
            }
        };
        if let Some(record) = &removed {
            self.emit(Change::Removed(Arc::clone(record)));
        }
        Ok(removed)
    }

    /// Replace every visible record. A view keeps the records outside its
    /// scope and only replaces its own subset.
    fn set_data(&self, records: Vec<R>) -> Result<()> {
        let mut fresh = Records::new();
        if self.scope.is_some() {
            let current = self.shared.records.borrow();
            for (id, record) in current.ids.iter().zip(&current.items) {
                if !self.in_scope(record) {
                    fresh.push(id.clone(), Arc::clone(record));
                }
            }
        }
        for record in records {
            let id = self.id_of(&record);
            self.check_scope(&id, &record)?;
            if fresh.positions.contains_key(&id) {
                return Err(IndexError::DuplicateId { id: id.to_string() });
            }
            fresh.push(id, Arc::new(record));
        }
        *self.shared.records.borrow_mut() = fresh;
        self.emit(Change::Reset);
        Ok(())
    }

    fn len(&self) -> usize {
        let records = self.shared.records.borrow();
        match &self.scope {
            None => records.items.len(),
            Some(predicate) => records.items.iter().filter(|r| predicate(&***r)).count(),
        }
    }

    fn subscribe(&self, listener: Listener<R>) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.get());
        self.shared.next_subscription.set(id.0 + 1);
        self.shared.subscribers.borrow_mut().push(Subscriber {
            id,
            scope: self.scope.clone(),
            listener,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // The listener may own the last handle to something that unsubscribes
        // on drop, so it is dropped only after the borrow ends.
        let removed = {
            let mut subscribers = self.shared.subscribers.borrow_mut();
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|pos| subscribers.remove(pos))
        };
        removed.is_some()
    }

    fn filter(&self, predicate: Predicate<R>) -> Self {
        let scope: Predicate<R> = match &self.scope {
            None => predicate,
            Some(outer) => {
                let outer = Rc::clone(outer);
                Rc::new(move |record: &R| outer(record) && predicate(record))
            }
        };
        MemoryStore {
            shared: Rc::clone(&self.shared),
            scope: Some(scope),
        }
    }
}

impl<R> Clone for MemoryStore<R> {
    fn clone(&self) -> Self {
        MemoryStore {
            shared: Rc::clone(&self.shared),
            scope: self.scope.clone(),
        }
    }
}

impl<R> fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.shared.records.borrow().items.len())
            .field("subscribers", &self.shared.subscribers.borrow().len())
            .field("view", &self.scope.is_some())
            .finish()
    }
}
