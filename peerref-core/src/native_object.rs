//! Native objects with a managed peer.
//!
//! A [`NativeObject`] starts with one count owned by its peer. The peer's
//! finalizer gives that count back once the peer is collected, so the
//! native half lives exactly as long as either side still uses it.

use std::{
    any::{Any, TypeId},
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{fence, AtomicI32, Ordering},
};

use peerref_vm::{NativePeer, RawRef, RawWeak};

use crate::{
    any_object::{AnyObject, Bridgeable, ManagedClass},
    context,
    handles::PassLocalRef,
    refs,
};

pub struct NativeObject<T: ManagedClass + Send + Sync> {
    ref_count: AtomicI32,
    /// The object's only durable handle to its own peer.
    bind: RawWeak,
    value: T,
}

unsafe fn finalize<T: ManagedClass + Send + Sync>(address: usize) {
    let object = &*(address as *const NativeObject<T>);
    log::trace!("Peer of {} at {:#x} collected", T::CLASS_NAME, address);
    object.release();
}

impl<T: ManagedClass + Send + Sync> NativeObject<T> {
    /// Wraps `value` and ties it to a peer: the one the runtime pushed for
    /// this construction, or a fresh one of class `T::CLASS_NAME`.
    pub fn new(value: T) -> PassLocalRef<Self> {
        let pending = context::pop_local_caller_object_ref();
        let peer = if pending.is_null() {
            refs::new_peer(T::CLASS_NAME)
        } else {
            refs::ref_local(pending)
        };
        let ptr = Self::bind_to(peer, value);
        if peer.is_null() {
            log::error!("No peer for a new {}; it lives native-only", T::CLASS_NAME);
            // SAFETY: the initial count becomes the transfer handle's.
            return unsafe { PassLocalRef::adopt(RawRef::NULL, Some(ptr)) };
        }
        // SAFETY: `peer` is a fresh local owned by this call and the retain
        // belongs to the returned handle.
        unsafe {
            ptr.as_ref().retain();
            PassLocalRef::adopt(peer, Some(ptr))
        }
    }

    /// Constructor path for an object whose peer already exists: consumes
    /// the pending owner pushed by the caller. The returned pointer carries
    /// no retain of its own.
    pub fn construct(value: T) -> Option<NonNull<Self>> {
        let pending = context::pop_local_caller_object_ref();
        if pending.is_null() {
            log::error!("{} constructed without a pending owner", T::CLASS_NAME);
            return None;
        }
        Some(Self::bind_to(pending, value))
    }

    fn bind_to(peer: RawRef, value: T) -> NonNull<Self> {
        let bind = refs::ref_weak_global(peer);
        let object = Box::new(NativeObject {
            ref_count: AtomicI32::new(1),
            bind,
            value,
        });
        let ptr = NonNull::from(Box::leak(object));
        if !peer.is_null() {
            let bound = refs::bind_native_peer(
                peer,
                NativePeer {
                    address: ptr.as_ptr() as usize,
                    type_id: TypeId::of::<Self>(),
                    finalize: finalize::<T>,
                },
            );
            if !bound {
                log::warn!("Could not record the native half of a {}", T::CLASS_NAME);
            }
        }
        ptr
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// The weak self-handle every scoped and pinned handle is promoted from.
    pub fn bind(&self) -> RawWeak {
        self.bind
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: ManagedClass + Send + Sync> Drop for NativeObject<T> {
    fn drop(&mut self) {
        log::trace!("Destroying native {} at {:p}", T::CLASS_NAME, self);
        refs::unbind_native_peer(self.bind, self as *const Self as usize);
        refs::deref_weak_global(std::mem::take(&mut self.bind));
    }
}

impl<T: ManagedClass + Send + Sync> Deref for NativeObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

unsafe impl<T: ManagedClass + Send + Sync> AnyObject for NativeObject<T> {
    fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "{} released more than retained", T::CLASS_NAME);
        if previous == 1 {
            fence(Ordering::Acquire);
            // SAFETY: the count just reached zero, so nothing else can reach
            // this allocation.
            unsafe { drop(Box::from_raw(self as *const Self as *mut Self)) };
        }
    }

    fn ref_local(&self) -> RawRef {
        refs::ref_local(self.bind.into())
    }

    fn ref_global(&self) -> RawRef {
        refs::ref_global(self.bind.into())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: ManagedClass + Send + Sync> Bridgeable for NativeObject<T> {
    fn from_ref(raw: RawRef) -> PassLocalRef<Self> {
        if raw.is_null() {
            return PassLocalRef::null();
        }
        match refs::native_peer(raw) {
            Some(peer) if peer.is::<Self>() => {
                let ptr = peer.address as *mut Self;
                // SAFETY: a bound peer names a live object; the retain
                // belongs to the returned handle.
                unsafe {
                    (*ptr).retain();
                    PassLocalRef::adopt(raw, NonNull::new(ptr))
                }
            }
            found => {
                log::warn!(
                    "Handle {:?} is not a {} (peer: {:?})",
                    raw,
                    T::CLASS_NAME,
                    found
                );
                refs::deref_local(raw);
                PassLocalRef::null()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{push_local_caller_object_ref, use_backend, BackendKind},
        handles::{GlobalRef, LocalRef, WeakGlobalRef},
        test_support,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Counter {
        dropped: Arc<AtomicUsize>,
    }

    impl ManagedClass for Counter {
        const CLASS_NAME: &'static str = "demo/Counter";
    }

    impl Drop for Counter {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Other;

    impl ManagedClass for Other {
        const CLASS_NAME: &'static str = "demo/Other";
    }

    fn counter() -> (Counter, Arc<AtomicUsize>) {
        let dropped = Arc::new(AtomicUsize::new(0));
        (
            Counter {
                dropped: dropped.clone(),
            },
            dropped,
        )
    }

    #[test]
    fn test_balanced_mint_and_release_keeps_refcount() {
        let _backend = use_backend(BackendKind::Native);
        let (value, _) = counter();
        let object = LocalRef::from(NativeObject::new(value));
        let before = object.get_ptr().map(NativeObject::ref_count);

        let handles: Vec<GlobalRef<_>> = (0..4).map(|_| GlobalRef::from(&object)).collect();
        let locals: Vec<LocalRef<_>> = handles.iter().map(LocalRef::from).collect();
        assert_eq!(object.get_ptr().map(NativeObject::ref_count), before.map(|n| n + 8));
        drop(locals);
        drop(handles);
        assert_eq!(object.get_ptr().map(NativeObject::ref_count), before);
    }

    #[test]
    fn test_native_backend_destroys_with_last_handle() {
        let _backend = use_backend(BackendKind::Native);
        let (value, dropped) = counter();
        let pass = NativeObject::new(value);
        assert_eq!(pass.get_ptr().map(NativeObject::ref_count), Some(2));
        drop(pass);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_managed_peer_keeps_object_until_collected() {
        let runtime = test_support::runtime();
        let _backend = use_backend(BackendKind::Managed);
        let (value, dropped) = counter();
        let pass = NativeObject::new(value);
        let weak = WeakGlobalRef::<NativeObject<Counter>>::from_raw(pass.raw());
        runtime.collect();
        assert!(!weak.is_expired());
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(pass);
        runtime.collect();
        assert!(weak.is_expired());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_construction_adopts_the_pending_owner() {
        let _runtime = test_support::runtime();
        let _backend = use_backend(BackendKind::Managed);
        let peer = refs::new_peer(Counter::CLASS_NAME);
        let object = {
            let _owner = push_local_caller_object_ref(peer);
            let (value, _) = counter();
            NativeObject::new(value)
        };
        assert!(refs::is_same_object(object.raw(), peer));
        assert_eq!(context::pending_caller_objects(), 0);

        let resolved = NativeObject::<Counter>::from_ref(refs::ref_local(peer));
        assert_eq!(resolved.get_ptr().map(|o| o as *const _), object.get_ptr().map(|o| o as *const _));
        refs::deref_local(peer);
    }

    #[test]
    fn test_from_ref_rejects_another_type() {
        let _backend = use_backend(BackendKind::Native);
        let (value, _) = counter();
        let object = NativeObject::new(value);
        let other = NativeObject::<Other>::from_ref(refs::ref_local(object.raw()));
        assert!(other.is_null());
        assert!(other.get_ptr().is_none());
    }

    #[test]
    fn test_construct_requires_a_pending_owner() {
        let (value, _) = counter();
        assert!(NativeObject::construct(value).is_none());
    }
}
