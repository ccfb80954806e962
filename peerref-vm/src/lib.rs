//! A small garbage-collected runtime with JNI-style references.
//!
//! # 子模块
//! - [`handle`]: raw handle values and generational slot tables
//! - [`object`]: heap objects, native peers and tracing
//! - [`runtime`]: the heap, global/weak tables and thread attachment
//! - [`env`]: thread-bound access used by native code
//! - [`finalizer`]: deferred native finalizers
pub mod env;
pub mod error;
pub mod finalizer;
pub mod handle;
pub mod object;
pub mod runtime;
mod thread;

pub use env::{Env, FieldValue, LocalFrame};
pub use error::VmError;
pub use handle::{RawRef, RawWeak, RefKind};
pub use object::{NativePeer, PrimitiveElement};
pub use runtime::{Runtime, RuntimeConfig, RuntimeStats};
