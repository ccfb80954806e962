use std::{
    cmp::Ordering,
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    marker::PhantomData,
};

use peerref_vm::RawRef;

use super::{
    pass::PassLocalRef,
    ref_core::RefCore,
    strength::{HandleStrength, Pinned, Scoped, Strength},
};
use crate::any_object::{AnyObject, Bridgeable};

/// A durable handle of strength `S` plus one retain on the object.
///
/// Copies re-derive a fresh handle of the destination's strength; dropping
/// releases the handle and then the retain.
pub struct Ref<T: ?Sized + AnyObject, S: Strength> {
    core: RefCore<T>,
    _strength: PhantomData<S>,
}

/// Valid until the current local frame ends. Not `Send`.
pub type LocalRef<T> = Ref<T, Scoped>;
/// Valid until dropped, on any thread.
pub type GlobalRef<T> = Ref<T, Pinned>;

// SAFETY: a pinned handle is usable from every attached thread and `T` is
// `Send + Sync` through `AnyObject`.
unsafe impl<T: ?Sized + AnyObject> Send for Ref<T, Pinned> {}
unsafe impl<T: ?Sized + AnyObject> Sync for Ref<T, Pinned> {}

impl<T: ?Sized + AnyObject, S: Strength> Ref<T, S> {
    #[inline]
    fn wrap(core: RefCore<T>) -> Self {
        Ref {
            core,
            _strength: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self::wrap(RefCore::empty())
    }

    /// Retains `object` and mints a handle of strength `S` to it.
    pub fn from_object(object: &T) -> Self {
        Self::wrap(RefCore::from_object(object, S::STRENGTH))
    }

    /// Handle-only reference: promotes `raw` without resolving an object.
    pub fn from_raw(raw: RawRef) -> Self {
        Self::wrap(RefCore::from_raw(raw, None, S::STRENGTH))
    }

    /// Replaces the referent with `other`'s, at this handle's strength.
    pub fn copy_from<S2: Strength>(&mut self, other: &Ref<T, S2>) {
        *self = Self::from(other);
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

    pub fn strength(&self) -> HandleStrength {
        S::STRENGTH
    }

    pub fn reset(&mut self) {
        self.core.clear(S::STRENGTH);
    }

    /// Transfer handle to the same object, leaving `self` untouched.
    pub fn to_pass(&self) -> PassLocalRef<T> {
        PassLocalRef::from_core(self.core.rederive(HandleStrength::Scoped))
    }

    /// Converts into a transfer handle. A scoped handle moves as is.
    pub fn into_pass(mut self) -> PassLocalRef<T> {
        match S::STRENGTH {
            HandleStrength::Scoped => PassLocalRef::from_core(self.core.take()),
            HandleStrength::Pinned => self.to_pass(),
        }
    }

    pub fn to_local(&self) -> LocalRef<T> {
        LocalRef::from(self)
    }

    pub fn to_global(&self) -> GlobalRef<T> {
        GlobalRef::from(self)
    }

    /// Same referent seen as `U`. Empty if it is not one.
    pub fn cast<U: Bridgeable>(&self) -> Ref<U, S> {
        Ref::from(self.to_pass().cast::<U>())
    }

    /// Address the handle compares and hashes by.
    pub fn identity(&self) -> Option<usize> {
        self.core.identity()
    }
}

impl<T: AnyObject, S: Strength> Ref<T, S> {
    pub fn into_any(mut self) -> Ref<dyn AnyObject, S> {
        Ref::wrap(self.core.take().into_any())
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Default for Ref<T, S> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Drop for Ref<T, S> {
    fn drop(&mut self) {
        self.core.clear(S::STRENGTH);
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Clone for Ref<T, S> {
    fn clone(&self) -> Self {
        Self::wrap(self.core.rederive(S::STRENGTH))
    }
}

impl<T: ?Sized + AnyObject, S: Strength> From<PassLocalRef<T>> for Ref<T, S> {
    fn from(mut pass: PassLocalRef<T>) -> Self {
        match S::STRENGTH {
            HandleStrength::Scoped => Self::wrap(pass.take_core()),
            // The transfer handle is released when `pass` drops.
            HandleStrength::Pinned => Self::wrap(pass.core().rederive(HandleStrength::Pinned)),
        }
    }
}

impl<T: ?Sized + AnyObject, S: Strength, S2: Strength> From<&Ref<T, S2>> for Ref<T, S> {
    fn from(other: &Ref<T, S2>) -> Self {
        Self::wrap(other.core.rederive(S::STRENGTH))
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Debug for Ref<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("strength", &S::STRENGTH)
            .field("raw", &self.core.raw())
            .field("ptr", &self.core.ptr().map(|p| p.as_ptr() as *const ()))
            .finish()
    }
}

impl<T: ?Sized + AnyObject, S: Strength, S2: Strength> PartialEq<Ref<T, S2>> for Ref<T, S> {
    fn eq(&self, other: &Ref<T, S2>) -> bool {
        self.identity() == other.identity()
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Eq for Ref<T, S> {}

impl<T: ?Sized + AnyObject, S: Strength> PartialOrd for Ref<T, S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Ord for Ref<T, S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl<T: ?Sized + AnyObject, S: Strength> Hash for Ref<T, S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}
