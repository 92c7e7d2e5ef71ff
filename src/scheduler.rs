//! Rebuild scheduling
//!
//! A small per-collection state machine deciding what a mutation or a bulk
//! boundary means for the index registry:
//!
//! ```text
//! Idle            --mutation-->    Idle             (rebuild, or invalidate when lazy)
//! Idle            --begin bulk-->  BulkActive
//! BulkActive      --mutation-->    BulkActiveDirty  (suppressed)
//! BulkActiveDirty --mutation-->    BulkActiveDirty  (suppressed)
//! BulkActive      --end bulk-->    Idle             (nothing to do)
//! BulkActiveDirty --end bulk-->    Idle             (one rebuild, or invalidate when lazy)
//! ```
//!
//! Bulk operations nest; only the outermost end leaves the bulk states.

/// When a requested rebuild actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildMode {
    /// Rebuild synchronously right after the mutation.
    #[default]
    Eager,
    /// Mark the registry stale; rebuild on the next read.
    Lazy,
}

impl RebuildMode {
    pub fn from_lazy(lazy: bool) -> Self {
        if lazy {
            RebuildMode::Lazy
        } else {
            RebuildMode::Eager
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildState {
    Idle,
    BulkActive,
    BulkActiveDirty,
}

/// What the owner of the registry must do after a scheduler transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Nothing,
    Rebuild,
    Invalidate,
    /// A mutation was absorbed by an active bulk operation.
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    state: RebuildState,
    depth: usize,
    mode: RebuildMode,
}

impl Scheduler {
    pub fn new(mode: RebuildMode) -> Self {
        Self {
            state: RebuildState::Idle,
            depth: 0,
            mode,
        }
    }

    pub fn state(&self) -> RebuildState {
        self.state
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn in_bulk(&self) -> bool {
        self.state != RebuildState::Idle
    }

    /// The action matching the rebuild policy when a rebuild is due.
    fn due(&self) -> Action {
        match self.mode {
            RebuildMode::Eager => Action::Rebuild,
            RebuildMode::Lazy => Action::Invalidate,
        }
    }

    pub fn on_mutation(&mut self) -> Action {
        match self.state {
            RebuildState::Idle => self.due(),
            RebuildState::BulkActive | RebuildState::BulkActiveDirty => {
                self.state = RebuildState::BulkActiveDirty;
                Action::Suppressed
            }
        }
    }

    pub fn begin_bulk(&mut self) {
        self.depth += 1;
        if self.state == RebuildState::Idle {
            self.state = RebuildState::BulkActive;
        }
    }

    /// Leave one level of bulk operation.
    ///
    /// Returns `None` when no bulk operation was active.
    pub fn end_bulk(&mut self) -> Option<Action> {
        if self.depth == 0 {
            return None;
        }

        self.depth -= 1;
        if self.depth > 0 {
            return Some(Action::Nothing);
        }

        let action = match self.state {
            RebuildState::BulkActiveDirty => self.due(),
            _ => Action::Nothing,
        };
        self.state = RebuildState::Idle;
        Some(action)
    }

    /// Record that a rebuild ran; any dirtiness accumulated so far is covered.
    pub fn mark_clean(&mut self) {
        if self.state == RebuildState::BulkActiveDirty {
            self.state = RebuildState::BulkActive;
        }
    }
}
