use std::any::Any;

use peerref_vm::RawRef;

use crate::handles::PassLocalRef;

/// A reference-counted native object that handles can point at.
///
/// # Safety
/// Implementors must keep a stable address for as long as any retain is
/// outstanding, and must only be freed by the `release` that drops the last
/// one.
pub unsafe trait AnyObject: Send + Sync + 'static {
    fn retain(&self);

    fn release(&self);

    /// New scoped handle to `self`, or NULL if it has no managed identity.
    fn ref_local(&self) -> RawRef {
        RawRef::NULL
    }

    /// New pinned handle to `self`, or NULL if it has no managed identity.
    fn ref_global(&self) -> RawRef {
        RawRef::NULL
    }

    fn as_any(&self) -> &dyn Any;
}

/// Name of the managed class that mirrors a native type.
pub trait ManagedClass: 'static {
    const CLASS_NAME: &'static str;
}

/// Concrete objects that can be recovered from a handle value.
pub trait Bridgeable: AnyObject + Sized {
    /// Adopts the scoped handle `raw` and returns the object bound to its
    /// peer. Returns an empty handle (and releases `raw`) when the peer is
    /// not bound to a `Self`.
    fn from_ref(raw: RawRef) -> PassLocalRef<Self>;
}
