use std::ptr::NonNull;

use peerref_vm::RawRef;

use super::strength::HandleStrength;
use crate::{any_object::AnyObject, refs};

/// A handle value plus an optional native pointer, each owning one count:
/// the handle at whatever strength the wrapper has, the pointer one retain.
///
/// The core has no `Drop`; wrappers release it with their strength.
pub(crate) struct RefCore<T: ?Sized + AnyObject> {
    ptr: Option<NonNull<T>>,
    raw: RawRef,
}

impl<T: ?Sized + AnyObject> RefCore<T> {
    #[inline]
    pub(crate) fn empty() -> Self {
        RefCore {
            ptr: None,
            raw: RawRef::NULL,
        }
    }

    /// # Safety
    /// The caller hands over ownership of `raw` and of one retain on `ptr`.
    #[inline]
    pub(crate) unsafe fn adopt(raw: RawRef, ptr: Option<NonNull<T>>) -> Self {
        RefCore { ptr, raw }
    }

    pub(crate) fn from_object(object: &T, strength: HandleStrength) -> Self {
        object.retain();
        RefCore {
            ptr: Some(NonNull::from(object)),
            raw: strength.mint(object),
        }
    }

    /// Promotes `raw` to `strength`. When there is no handle to promote but
    /// there is an object, the object mints one.
    pub(crate) fn from_raw(raw: RawRef, ptr: Option<NonNull<T>>, strength: HandleStrength) -> Self {
        let promoted = strength.promote(raw);
        let Some(ptr) = ptr else {
            return RefCore {
                ptr: None,
                raw: promoted,
            };
        };
        // SAFETY: callers pass pointers they hold a retain on.
        let object = unsafe { ptr.as_ref() };
        object.retain();
        let raw = if promoted.is_null() {
            strength.mint(object)
        } else {
            promoted
        };
        RefCore {
            ptr: Some(ptr),
            raw,
        }
    }

    #[inline]
    pub(crate) fn rederive(&self, strength: HandleStrength) -> Self {
        Self::from_raw(self.raw, self.ptr, strength)
    }

    /// Releases the handle at `strength`, then the retain. Leaves the core
    /// empty, so a second call does nothing.
    pub(crate) fn clear(&mut self, strength: HandleStrength) {
        let raw = std::mem::take(&mut self.raw);
        strength.release(raw);
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: the retain taken when `ptr` was stored is still held.
            unsafe { ptr.as_ref().release() };
        }
    }

    #[inline]
    pub(crate) fn take(&mut self) -> Self {
        std::mem::replace(self, Self::empty())
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (RawRef, Option<NonNull<T>>) {
        (self.raw, self.ptr)
    }

    #[inline]
    pub(crate) fn raw(&self) -> RawRef {
        self.raw
    }

    #[inline]
    pub(crate) fn ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    #[inline]
    pub(crate) fn get(&self) -> Option<&T> {
        // SAFETY: the held retain keeps the object alive for `&self`.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_none() && self.raw.is_null()
    }

    /// The referent as the backend sees it, so typed and handle-only
    /// handles to one object agree. Only a core without a handle value
    /// falls back to the native address.
    pub(crate) fn identity(&self) -> Option<usize> {
        if !self.raw.is_null() {
            return refs::identity(self.raw);
        }
        self.ptr.map(|ptr| ptr.as_ptr() as *const () as usize)
    }
}

impl<T: AnyObject> RefCore<T> {
    pub(crate) fn into_any(self) -> RefCore<dyn AnyObject> {
        RefCore {
            ptr: self.ptr.map(|ptr| ptr as NonNull<dyn AnyObject>),
            raw: self.raw,
        }
    }
}
