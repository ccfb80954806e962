use std::{
    fmt::{self, Debug},
    ptr::NonNull,
};

use peerref_vm::RawRef;

use super::{ref_core::RefCore, strength::HandleStrength};
use crate::any_object::{AnyObject, Bridgeable};

/// Move-only transfer of one scoped handle and one retain.
///
/// This is what crosses a call boundary: the receiver either keeps it
/// (converting into a [`LocalRef`](super::LocalRef) or
/// [`GlobalRef`](super::GlobalRef)) or lets it drop.
pub struct PassLocalRef<T: ?Sized + AnyObject> {
    core: RefCore<T>,
}

impl<T: ?Sized + AnyObject> PassLocalRef<T> {
    pub fn null() -> Self {
        PassLocalRef {
            core: RefCore::empty(),
        }
    }

    /// # Safety
    /// The caller hands over ownership of the scoped handle `raw` and of
    /// one retain on `ptr`.
    pub unsafe fn adopt(raw: RawRef, ptr: Option<NonNull<T>>) -> Self {
        PassLocalRef {
            core: RefCore::adopt(raw, ptr),
        }
    }

    pub fn from_object(object: &T) -> Self {
        PassLocalRef {
            core: RefCore::from_object(object, HandleStrength::Scoped),
        }
    }

    /// Handle-only transfer of a new scoped handle to `raw`'s referent.
    pub fn from_raw(raw: RawRef) -> Self {
        PassLocalRef {
            core: RefCore::from_raw(raw, None, HandleStrength::Scoped),
        }
    }

    pub(crate) fn from_core(core: RefCore<T>) -> Self {
        PassLocalRef { core }
    }

    pub(crate) fn core(&self) -> &RefCore<T> {
        &self.core
    }

    pub(crate) fn take_core(&mut self) -> RefCore<T> {
        self.core.take()
    }

    #[inline]
    pub fn raw(&self) -> RawRef {
        self.core.raw()
    }

    #[inline]
    pub fn get_ptr(&self) -> Option<&T> {
        self.core.get()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.core.is_null()
    }

    /// Moves the contents out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        PassLocalRef {
            core: self.core.take(),
        }
    }

    /// Gives up the retain and hands the scoped handle to the caller, who
    /// now owns it. `self` is left empty.
    pub fn leak(&mut self) -> RawRef {
        let (raw, ptr) = self.core.take().into_parts();
        if let Some(ptr) = ptr {
            // SAFETY: releases the retain this handle held.
            unsafe { ptr.as_ref().release() };
        }
        raw
    }

    /// Reinterprets the referent as `U`. The pointer is reused when it is
    /// already a `U`; otherwise the handle is resolved again by `U`.
    pub fn cast<U: Bridgeable>(mut self) -> PassLocalRef<U> {
        let matches = self
            .core
            .get()
            .map_or(false, |object| object.as_any().is::<U>());
        if matches {
            let (raw, ptr) = self.core.take().into_parts();
            let ptr = ptr.map(|ptr| ptr.cast::<U>());
            // SAFETY: `as_any` confirmed the pointee is a `U`; ownership of
            // the handle and the retain moves over unchanged.
            return unsafe { PassLocalRef::adopt(raw, ptr) };
        }
        U::from_ref(self.leak())
    }
}

impl<T: AnyObject> PassLocalRef<T> {
    pub fn into_any(mut self) -> PassLocalRef<dyn AnyObject> {
        PassLocalRef {
            core: self.core.take().into_any(),
        }
    }
}

impl PassLocalRef<dyn AnyObject> {
    /// Takes ownership of the scoped handle `raw` without resolving it.
    pub fn from_handle(raw: RawRef) -> Self {
        // SAFETY: no pointer, so only the handle changes owner.
        unsafe { Self::adopt(raw, None) }
    }
}

impl<T: ?Sized + AnyObject> Default for PassLocalRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + AnyObject> Drop for PassLocalRef<T> {
    fn drop(&mut self) {
        self.core.clear(HandleStrength::Scoped);
    }
}

impl<T: ?Sized + AnyObject> Debug for PassLocalRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassLocalRef")
            .field("raw", &self.core.raw())
            .field("ptr", &self.core.ptr().map(|p| p.as_ptr() as *const ()))
            .finish()
    }
}
