use std::{
    fmt::{self, Debug},
    marker::PhantomData,
    sync::{PoisonError, RwLock, RwLockReadGuard},
};

use peerref_vm::{RawRef, RawWeak};

use super::{durable::Ref, pass::PassLocalRef, strength::Strength};
use crate::{
    any_object::{AnyObject, Bridgeable},
    refs,
};

/// An expirable handle. Holds no retain and does not keep the referent
/// reachable; promote it to use the object.
///
/// The stored value is only used under the read lock and only cleared under
/// the write lock, so a shared handle never releases a value another thread
/// is still querying.
pub struct WeakGlobalRef<T: ?Sized + AnyObject> {
    raw: RwLock<RawWeak>,
    _marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized + AnyObject> WeakGlobalRef<T> {
    pub fn null() -> Self {
        Self::adopt(RawWeak::NULL)
    }

    /// New weak handle to whatever `raw` names.
    pub fn from_raw(raw: RawRef) -> Self {
        Self::adopt(refs::ref_weak_global(raw))
    }

    /// Takes ownership of an existing weak handle.
    pub fn adopt(weak: RawWeak) -> Self {
        WeakGlobalRef {
            raw: RwLock::new(weak),
            _marker: PhantomData,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RawWeak> {
        self.raw.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the stored value. Another thread may clear it right after.
    #[inline]
    pub fn raw(&self) -> RawWeak {
        *self.read()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.raw().is_null()
    }

    /// True once the referent is gone. The first call that notices releases
    /// the stored handle, so later calls answer without the backend.
    pub fn is_expired(&self) -> bool {
        let weak = {
            let weak = self.read();
            if weak.is_null() {
                return true;
            }
            if !refs::is_expired_weak_global(*weak) {
                return false;
            }
            *weak
        };
        self.clear_if(weak);
        true
    }

    /// Releases the stored value if it is still `stale`.
    fn clear_if(&self, stale: RawWeak) {
        let cleared = {
            let mut weak = self.raw.write().unwrap_or_else(PoisonError::into_inner);
            if *weak == stale {
                std::mem::take(&mut *weak)
            } else {
                RawWeak::NULL
            }
        };
        refs::deref_weak_global(cleared);
    }

    /// Runs `f` on a fresh local promoted from the stored value, or returns
    /// NULL when the referent is gone.
    fn promote_with<R>(&self, f: impl FnOnce(RawRef) -> R, empty: impl FnOnce() -> R) -> R {
        if self.is_expired() {
            return empty();
        }
        let local = {
            let weak = self.read();
            if weak.is_null() {
                return empty();
            }
            refs::ref_local((*weak).into())
        };
        // Collection can still win the race after the expiry check; the
        // promotion then yields NULL.
        if local.is_null() {
            return empty();
        }
        f(local)
    }

    /// Handle-only promotion, for when the concrete type does not matter.
    pub fn try_promote_any(&self) -> PassLocalRef<dyn AnyObject> {
        self.promote_with(PassLocalRef::<dyn AnyObject>::from_handle, PassLocalRef::null)
    }

    /// Promotes and resolves the referent as `U`.
    pub fn try_promote_as<U: Bridgeable>(&self) -> PassLocalRef<U> {
        self.promote_with(U::from_ref, PassLocalRef::null)
    }

    /// Hands the weak handle to the caller and leaves `self` empty.
    pub fn leak(&self) -> RawWeak {
        let mut weak = self.raw.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *weak)
    }

    pub fn reset(&self) {
        refs::deref_weak_global(self.leak());
    }
}

impl<T: Bridgeable> WeakGlobalRef<T> {
    pub fn try_promote(&self) -> PassLocalRef<T> {
        self.try_promote_as::<T>()
    }
}

impl<T: ?Sized + AnyObject> Default for WeakGlobalRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + AnyObject> Drop for WeakGlobalRef<T> {
    fn drop(&mut self) {
        let weak = self.raw.get_mut().unwrap_or_else(PoisonError::into_inner);
        refs::deref_weak_global(std::mem::take(weak));
    }
}

impl<T: ?Sized + AnyObject> Clone for WeakGlobalRef<T> {
    fn clone(&self) -> Self {
        let weak = self.read();
        Self::from_raw((*weak).into())
    }
}

/// Demotes a transfer handle; the transfer handle is consumed.
impl<T: ?Sized + AnyObject> From<PassLocalRef<T>> for WeakGlobalRef<T> {
    fn from(pass: PassLocalRef<T>) -> Self {
        Self::from_raw(pass.raw())
    }
}

impl<T: ?Sized + AnyObject, S: Strength> From<&Ref<T, S>> for WeakGlobalRef<T> {
    fn from(durable: &Ref<T, S>) -> Self {
        Self::from_raw(durable.raw())
    }
}

impl<T: ?Sized + AnyObject> Debug for WeakGlobalRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakGlobalRef({:?})", self.raw())
    }
}
