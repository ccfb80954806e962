//! Reference-counted native objects shared with a garbage-collected
//! runtime.
//!
//! Native code holds objects through [`handles`]. Each handle carries a
//! runtime handle value and, for typed handles, a retain on the native
//! object. Handle values are either managed (resolved through
//! [`peerref_vm::Env`]) or native records simulated by
//! [`object_reference`]; [`refs`] routes between the two.
//!
//! # 子模块
//! - [`any_object`]: the object capability traits
//! - [`native_object`]: native objects bound to a managed peer
//! - [`object_reference`]: the native-only backend
//! - [`handles`]: scoped, pinned, transfer and weak handles
//! - [`array`], [`marshal`]: crossing values over the boundary
//! - [`attach`], [`context`]: runtime installation and per-thread state
pub mod any_object;
pub mod array;
pub mod attach;
pub mod context;
pub mod error;
pub mod handles;
pub mod marshal;
pub mod native_object;
pub mod object_reference;
pub mod refs;

#[cfg(test)]
mod test_support;

pub use any_object::{AnyObject, Bridgeable, ManagedClass};
pub use array::{ArrayElement, PassArray};
pub use context::{BackendKind, PendingOwner};
pub use error::BridgeError;
pub use handles::{GlobalRef, LocalRef, PassLocalRef, Ref, WeakGlobalRef};
pub use native_object::NativeObject;
pub use peerref_vm::{RawRef, RawWeak};
