//! Per-thread bridge context.
//!
//! Holds the handles that the runtime side has pushed for native objects
//! about to be constructed, and the backend that new peers are created on.
//! The context is only ever touched by its own thread.

use std::{cell::RefCell, marker::PhantomData};

use peerref_vm::RawRef;

use crate::attach;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Peers are objects in the installed runtime.
    Managed,
    /// Peers are simulated by `ObjectReference` records.
    Native,
}

impl BackendKind {
    /// Backend for peers created on this thread: the thread's override if
    /// one is active, otherwise `Managed` when a runtime is installed.
    pub fn current() -> Self {
        let preferred = CONTEXT
            .try_with(|context| context.borrow().backend)
            .ok()
            .flatten();
        preferred.unwrap_or_else(|| {
            if attach::vm().is_some() {
                BackendKind::Managed
            } else {
                BackendKind::Native
            }
        })
    }
}

struct PendingEntry {
    ticket: u64,
    raw: RawRef,
}

#[derive(Default)]
struct ThreadContext {
    backend: Option<BackendKind>,
    pending: Vec<PendingEntry>,
    next_ticket: u64,
}

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::default());
}

/// Restores the previous backend override when dropped.
pub struct BackendGuard {
    previous: Option<BackendKind>,
    _thread_bound: PhantomData<*const ()>,
}

/// Overrides the backend used for new peers on this thread until the
/// guard drops.
pub fn use_backend(kind: BackendKind) -> BackendGuard {
    let previous = CONTEXT.with(|context| context.borrow_mut().backend.replace(kind));
    BackendGuard {
        previous,
        _thread_bound: PhantomData,
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CONTEXT.try_with(|context| context.borrow_mut().backend = previous);
    }
}

/// A caller-supplied handle waiting for the native object about to be
/// constructed on this thread.
///
/// The entry is removed when the object consumes it, or when the guard
/// drops, whichever comes first. The guard does not own the handle.
pub struct PendingOwner {
    ticket: u64,
    _thread_bound: PhantomData<*const ()>,
}

impl PendingOwner {
    pub fn push(raw: RawRef) -> Self {
        let ticket = CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            let ticket = context.next_ticket;
            context.next_ticket += 1;
            context.pending.push(PendingEntry { ticket, raw });
            ticket
        });
        PendingOwner {
            ticket,
            _thread_bound: PhantomData,
        }
    }

    /// True while the entry has not been consumed by a construction.
    pub fn is_pending(&self) -> bool {
        CONTEXT
            .try_with(|context| {
                context
                    .borrow()
                    .pending
                    .iter()
                    .any(|entry| entry.ticket == self.ticket)
            })
            .unwrap_or(false)
    }
}

impl Drop for PendingOwner {
    fn drop(&mut self) {
        let ticket = self.ticket;
        let _ = CONTEXT.try_with(|context| {
            let mut context = context.borrow_mut();
            if let Some(index) = context.pending.iter().position(|e| e.ticket == ticket) {
                let entry = context.pending.remove(index);
                log::debug!("Pending owner {:?} was never consumed", entry.raw);
            }
        });
    }
}

pub fn push_local_caller_object_ref(raw: RawRef) -> PendingOwner {
    PendingOwner::push(raw)
}

/// Takes the most recently pushed pending handle, or NULL.
pub fn pop_local_caller_object_ref() -> RawRef {
    CONTEXT
        .try_with(|context| context.borrow_mut().pending.pop())
        .ok()
        .flatten()
        .map_or(RawRef::NULL, |entry| entry.raw)
}

pub fn pending_caller_objects() -> usize {
    CONTEXT
        .try_with(|context| context.borrow().pending.len())
        .unwrap_or(0)
}
