//! Native-only backend.
//!
//! An [`ObjectReference`] gives a shared native payload the same local,
//! global and weak handle semantics that the managed runtime provides. The
//! handle value is the record's address. Local and global handles to one
//! record share that value; only the counters distinguish them.
//!
//! The payload is held through an explicit [`Lifecycle`]:
//!
//! ```text
//!            counts reach 0 (demote)
//!   Strong ───────────────────────────▶ WeakOnly
//!      ▲                                   │
//!      └───────── new handle while ────────┘
//!                 Weak::upgrade succeeds (resurrect)
//! ```
//!
//! Resurrection happens only when something outside the record still owns
//! the payload. When nothing does, minting a handle fails with NULL.

use std::{
    any::Any,
    ptr::NonNull,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use peerref_vm::{NativePeer, RawRef, RawWeak};

pub type SharedPayload = Arc<dyn Any + Send + Sync>;
type WeakPayload = Weak<dyn Any + Send + Sync>;

enum Lifecycle {
    Strong(SharedPayload),
    WeakOnly(WeakPayload),
}

impl Lifecycle {
    /// Strong → WeakOnly. Returns the strong pointer so the caller can drop
    /// it outside the record lock.
    fn demote(&mut self) -> Option<SharedPayload> {
        match self {
            Lifecycle::Strong(strong) => {
                let weak = Arc::downgrade(strong);
                match std::mem::replace(self, Lifecycle::WeakOnly(weak)) {
                    Lifecycle::Strong(strong) => Some(strong),
                    Lifecycle::WeakOnly(_) => None,
                }
            }
            Lifecycle::WeakOnly(_) => None,
        }
    }

    /// WeakOnly → Strong, if an external owner still keeps the payload.
    fn resurrect(&mut self) -> bool {
        match self {
            Lifecycle::Strong(_) => true,
            Lifecycle::WeakOnly(weak) => match weak.upgrade() {
                Some(strong) => {
                    *self = Lifecycle::Strong(strong);
                    true
                }
                None => false,
            },
        }
    }

    fn share(&self) -> Option<SharedPayload> {
        match self {
            Lifecycle::Strong(strong) => Some(strong.clone()),
            Lifecycle::WeakOnly(weak) => weak.upgrade(),
        }
    }

    fn is_expired(&self) -> bool {
        match self {
            Lifecycle::Strong(_) => false,
            Lifecycle::WeakOnly(weak) => weak.strong_count() == 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Counter {
    Local,
    Global,
}

pub struct ObjectReference {
    local_count: AtomicI32,
    global_count: AtomicI32,
    /// One per outstanding weak handle; keeps the record (not the payload)
    /// allocated.
    prevent_deletion: AtomicI32,
    lifecycle: Mutex<Lifecycle>,
    address: usize,
}

impl ObjectReference {
    /// Allocates a record holding `payload` with one local reference
    /// outstanding, and returns that local handle.
    pub fn create(payload: SharedPayload) -> RawRef {
        let address = Arc::as_ptr(&payload) as *const () as usize;
        let record = Box::new(ObjectReference {
            local_count: AtomicI32::new(1),
            global_count: AtomicI32::new(0),
            prevent_deletion: AtomicI32::new(0),
            lifecycle: Mutex::new(Lifecycle::Strong(payload)),
            address,
        });
        RawRef::from_native_ptr(Box::into_raw(record))
    }

    /// # Safety
    /// `raw` must be a handle returned by [`ObjectReference::create`] (or a
    /// copy of one) whose record has not been freed.
    unsafe fn record<'a>(raw: RawRef) -> Option<&'a ObjectReference> {
        raw.native_ptr::<ObjectReference>()
            .and_then(|ptr| NonNull::new(ptr as *mut ObjectReference))
            .map(|ptr| &*ptr.as_ptr())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn counter(&self, which: Counter) -> &AtomicI32 {
        match which {
            Counter::Local => &self.local_count,
            Counter::Global => &self.global_count,
        }
    }

    fn counts_are_zero(&self) -> bool {
        self.local_count.load(Ordering::Acquire) == 0
            && self.global_count.load(Ordering::Acquire) == 0
    }

    /// Payload address, fixed at creation.
    pub fn ptr(&self) -> usize {
        self.address
    }

    /// Payload address while the record holds it strongly.
    pub fn safe_ptr(&self) -> Option<usize> {
        matches!(*self.lifecycle(), Lifecycle::Strong(_)).then_some(self.address)
    }

    pub fn share_ptr(&self) -> Option<SharedPayload> {
        self.lifecycle().share()
    }

    pub fn local_count(&self) -> i32 {
        self.local_count.load(Ordering::Acquire)
    }

    pub fn global_count(&self) -> i32 {
        self.global_count.load(Ordering::Acquire)
    }

    /// No handle keeps the payload and nothing else owns it either.
    pub fn is_expired(&self) -> bool {
        let lifecycle = self.lifecycle();
        self.counts_are_zero() && lifecycle.is_expired()
    }

    fn acquire(&self, which: Counter) -> bool {
        let mut lifecycle = self.lifecycle();
        if self.counts_are_zero() && !lifecycle.resurrect() {
            return false;
        }
        self.counter(which).fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Drops one count. The record may be freed before this returns.
    ///
    /// # Safety
    /// `ptr` must name a live record and the caller must own one count of
    /// kind `which`.
    unsafe fn release(ptr: *const ObjectReference, which: Counter) {
        let record = &*ptr;
        let (payload, free) = {
            let mut lifecycle = record.lifecycle();
            let previous = record.counter(which).fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "{:?} count of {:p} underflowed", which, ptr);
            if previous <= 0 {
                record.counter(which).fetch_add(1, Ordering::AcqRel);
                log::error!("Released a {:?} reference to {:p} that was not held", which, ptr);
                return;
            }
            if record.counts_are_zero() {
                let payload = lifecycle.demote();
                (payload, record.prevent_deletion.load(Ordering::Acquire) == 0)
            } else {
                (None, false)
            }
        };
        // Runs the payload destructor, which may re-enter through a weak
        // handle; a held weak handle means `free` is false.
        drop(payload);
        if free {
            Self::free(ptr);
        }
    }

    unsafe fn add_weak(&self) {
        let _lifecycle = self.lifecycle();
        self.prevent_deletion.fetch_add(1, Ordering::AcqRel);
    }

    unsafe fn release_weak(ptr: *const ObjectReference) {
        let record = &*ptr;
        let free = {
            let _lifecycle = record.lifecycle();
            let previous = record.prevent_deletion.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "weak count of {:p} underflowed", ptr);
            if previous <= 0 {
                record.prevent_deletion.fetch_add(1, Ordering::AcqRel);
                log::error!("Released a weak reference to {:p} that was not held", ptr);
                return;
            }
            previous == 1 && record.counts_are_zero()
        };
        if free {
            Self::free(ptr);
        }
    }

    unsafe fn free(ptr: *const ObjectReference) {
        log::trace!("Freeing native record {:p}", ptr);
        drop(Box::from_raw(ptr as *mut ObjectReference));
    }
}

// ---- handle-level primitives for native handles ---------------------------

fn mint(raw: RawRef, which: Counter) -> RawRef {
    // SAFETY: callers only pass handles that they hold.
    match unsafe { ObjectReference::record(raw) } {
        Some(record) if record.acquire(which) => raw,
        Some(_) => {
            log::debug!("Cannot revive {:?}: its payload has no owner left", raw);
            RawRef::NULL
        }
        None => RawRef::NULL,
    }
}

fn drop_count(raw: RawRef, which: Counter) {
    if let Some(ptr) = raw.native_ptr::<ObjectReference>() {
        // SAFETY: the caller owns the count it is releasing.
        unsafe { ObjectReference::release(ptr, which) }
    }
}

pub fn ref_local(raw: RawRef) -> RawRef {
    mint(raw, Counter::Local)
}

pub fn deref_local(raw: RawRef) {
    drop_count(raw, Counter::Local)
}

pub fn ref_global(raw: RawRef) -> RawRef {
    mint(raw, Counter::Global)
}

pub fn deref_global(raw: RawRef) {
    drop_count(raw, Counter::Global)
}

/// Weak handles are the record address with a deletion guard held.
pub fn ref_weak(raw: RawRef) -> RawWeak {
    // SAFETY: the caller holds `raw`.
    match unsafe { ObjectReference::record(raw) } {
        Some(record) => {
            unsafe { record.add_weak() };
            RawWeak::from_bits(raw.bits())
        }
        None => RawWeak::NULL,
    }
}

pub fn deref_weak(weak: RawWeak) {
    if let Some(ptr) = weak.native_ptr::<ObjectReference>() {
        // SAFETY: the caller owns the weak handle.
        unsafe { ObjectReference::release_weak(ptr) }
    }
}

pub fn is_expired(weak: RawWeak) -> bool {
    // SAFETY: a held weak handle keeps the record allocated.
    unsafe { ObjectReference::record(weak.into()) }.map_or(true, ObjectReference::is_expired)
}

pub fn share_ptr(raw: RawRef) -> Option<SharedPayload> {
    // SAFETY: the caller holds `raw`.
    unsafe { ObjectReference::record(raw) }.and_then(ObjectReference::share_ptr)
}

pub fn identity(raw: RawRef) -> Option<usize> {
    // SAFETY: the caller holds `raw`.
    unsafe { ObjectReference::record(raw) }
        .filter(|record| !record.is_expired())
        .map(ObjectReference::ptr)
}

/// Runs `f` on the record behind `raw`, for inspection.
pub fn with_record<R>(raw: RawRef, f: impl FnOnce(&ObjectReference) -> R) -> Option<R> {
    // SAFETY: the caller holds `raw`.
    unsafe { ObjectReference::record(raw) }.map(f)
}

// ---- simulated peers ---------------------------------------------------------

/// Stand-in for a managed peer object on the native backend. When the last
/// strong owner lets go, the bound native object is finalized, just as a
/// collected managed peer would be.
pub struct PeerSlot {
    class: Box<str>,
    peer: Mutex<Option<NativePeer>>,
}

impl PeerSlot {
    pub fn new(class: &str) -> Self {
        PeerSlot {
            class: class.into(),
            peer: Mutex::new(None),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    fn slot(&self) -> MutexGuard<'_, Option<NativePeer>> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peer(&self) -> Option<NativePeer> {
        *self.slot()
    }

    pub fn bind(&self, peer: NativePeer) -> Option<NativePeer> {
        self.slot().replace(peer)
    }

    /// Clears the binding if it still names `address`.
    pub fn unbind(&self, address: usize) -> bool {
        let mut slot = self.slot();
        if slot.map_or(false, |peer| peer.address == address) {
            *slot = None;
            return true;
        }
        false
    }
}

impl Drop for PeerSlot {
    fn drop(&mut self) {
        let peer = self.peer.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(peer) = peer {
            log::trace!("Finalizing native half of a {} peer", self.class);
            // SAFETY: a bound native object unbinds itself before it is freed.
            unsafe { peer.run_finalizer() };
        }
    }
}

/// A fresh simulated peer of `class`, as a local handle.
pub fn new_peer(class: &str) -> RawRef {
    ObjectReference::create(Arc::new(PeerSlot::new(class)))
}

fn peer_slot(raw: RawRef) -> Option<Arc<PeerSlot>> {
    share_ptr(raw).and_then(|payload| payload.downcast::<PeerSlot>().ok())
}

pub fn native_peer(raw: RawRef) -> Option<NativePeer> {
    peer_slot(raw).and_then(|slot| slot.peer())
}

pub fn bind_native_peer(raw: RawRef, peer: NativePeer) -> bool {
    match peer_slot(raw) {
        Some(slot) => {
            slot.bind(peer);
            true
        }
        None => false,
    }
}

pub fn unbind_native_peer(weak: RawWeak, address: usize) {
    if let Some(slot) = peer_slot(weak.into()) {
        slot.unbind(address);
    }
}
