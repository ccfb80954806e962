use peerref_vm::RawRef;

use crate::{any_object::AnyObject, refs};

/// How long a durable handle keeps its referent reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStrength {
    /// Until the current local frame is popped or the thread detaches.
    Scoped,
    /// Until released explicitly.
    Pinned,
}

impl HandleStrength {
    /// New handle of this strength to whatever `raw` names.
    #[inline]
    pub fn promote(self, raw: RawRef) -> RawRef {
        match self {
            HandleStrength::Scoped => refs::ref_local(raw),
            HandleStrength::Pinned => refs::ref_global(raw),
        }
    }

    #[inline]
    pub fn release(self, raw: RawRef) {
        match self {
            HandleStrength::Scoped => refs::deref_local(raw),
            HandleStrength::Pinned => refs::deref_global(raw),
        }
    }

    /// New handle of this strength minted by the object itself.
    #[inline]
    pub fn mint<T: ?Sized + AnyObject>(self, object: &T) -> RawRef {
        match self {
            HandleStrength::Scoped => object.ref_local(),
            HandleStrength::Pinned => object.ref_global(),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Scoped {}
    impl Sealed for super::Pinned {}
}

/// Type-level [`HandleStrength`].
pub trait Strength: sealed::Sealed + 'static {
    const STRENGTH: HandleStrength;
}

#[derive(Debug)]
pub enum Scoped {}

#[derive(Debug)]
pub enum Pinned {}

impl Strength for Scoped {
    const STRENGTH: HandleStrength = HandleStrength::Scoped;
}

impl Strength for Pinned {
    const STRENGTH: HandleStrength = HandleStrength::Pinned;
}
