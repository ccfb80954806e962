//! Per-thread attachment state.
//!
//! Every thread keeps one [`ThreadState`] per runtime it is attached to,
//! keyed by runtime id. Local references live here and nowhere else, so a
//! local handle can never be resolved on a thread other than the one that
//! created it.

use std::{
    cell::RefCell,
    sync::{atomic::Ordering, Weak},
};

use arc_gc::arc::GCArc;
use rustc_hash::FxHashMap;

use crate::{
    handle::{HandleTable, SlotId},
    object::ManagedCell,
    runtime::Runtime,
};

thread_local! {
    static THREAD_STATES: RefCell<FxHashMap<u64, ThreadState>> = RefCell::new(FxHashMap::default());
}

pub(crate) struct LocalTable {
    table: HandleTable<GCArc<ManagedCell>>,
    /// Slots created in each open frame; index 0 is the base frame.
    frames: Vec<Vec<SlotId>>,
    warning_threshold: usize,
    warned: bool,
}

impl LocalTable {
    fn new(warning_threshold: usize) -> Self {
        LocalTable {
            table: HandleTable::new(),
            frames: vec![Vec::new()],
            warning_threshold,
            warned: false,
        }
    }

    pub(crate) fn insert(&mut self, value: GCArc<ManagedCell>) -> SlotId {
        let slot = self.table.insert(value);
        if let Some(frame) = self.frames.last_mut() {
            frame.push(slot);
        }
        if self.table.len() > self.warning_threshold && !self.warned {
            self.warned = true;
            log::warn!(
                "Local reference table holds {} entries (threshold {}); is a local frame missing?",
                self.table.len(),
                self.warning_threshold
            );
        }
        slot
    }

    pub(crate) fn get(&self, slot: SlotId) -> Option<&GCArc<ManagedCell>> {
        self.table.get(slot)
    }

    pub(crate) fn remove(&mut self, slot: SlotId) -> Option<GCArc<ManagedCell>> {
        let removed = self.table.remove(slot);
        if self.table.len() <= self.warning_threshold {
            self.warned = false;
        }
        removed
    }

    pub(crate) fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Closes the innermost frame and returns the references it still held.
    /// The base frame is never popped.
    pub(crate) fn pop_frame(&mut self) -> Option<Vec<GCArc<ManagedCell>>> {
        if self.frames.len() <= 1 {
            return None;
        }
        let frame = self.frames.pop()?;
        Some(
            frame
                .into_iter()
                .filter_map(|slot| self.table.remove(slot))
                .collect(),
        )
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

pub(crate) struct ThreadState {
    runtime: Weak<Runtime>,
    pub(crate) locals: LocalTable,
}

impl ThreadState {
    pub(crate) fn new(runtime: Weak<Runtime>, warning_threshold: usize) -> Self {
        ThreadState {
            runtime,
            locals: LocalTable::new(warning_threshold),
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.attached_counter().fetch_sub(1, Ordering::AcqRel);
            // thread::current() is unavailable during thread-local teardown
            log::debug!(
                "Detached a thread from runtime {} ({} locals released)",
                runtime.id(),
                self.locals.len()
            );
        }
    }
}

/// Runs `f` against this thread's state for `runtime_id`. Returns `None`
/// when the thread is not attached or its thread-locals are being torn down.
pub(crate) fn with_state<R>(runtime_id: u64, f: impl FnOnce(&mut ThreadState) -> R) -> Option<R> {
    THREAD_STATES
        .try_with(|states| {
            let mut states = states.try_borrow_mut().ok()?;
            states.get_mut(&runtime_id).map(f)
        })
        .ok()
        .flatten()
}

pub(crate) fn is_attached(runtime_id: u64) -> bool {
    THREAD_STATES
        .try_with(|states| {
            states
                .try_borrow()
                .map(|states| states.contains_key(&runtime_id))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Inserts a state built by `make` unless one already exists. Returns
/// whether a new state was inserted, or `None` if thread-locals are gone.
pub(crate) fn insert_state(
    runtime_id: u64,
    make: impl FnOnce() -> ThreadState,
) -> Option<bool> {
    THREAD_STATES
        .try_with(|states| {
            let mut states = states.try_borrow_mut().ok()?;
            if states.contains_key(&runtime_id) {
                return Some(false);
            }
            states.insert(runtime_id, make());
            Some(true)
        })
        .ok()
        .flatten()
}

/// Removes this thread's state for `runtime_id`. The state is dropped after
/// the registry borrow ends.
pub(crate) fn remove_state(runtime_id: u64) -> bool {
    let removed = THREAD_STATES
        .try_with(|states| {
            states
                .try_borrow_mut()
                .ok()
                .and_then(|mut states| states.remove(&runtime_id))
        })
        .ok()
        .flatten();
    removed.is_some()
}
