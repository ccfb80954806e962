//! Owning handle types.
//!
//! | type               | handle         | retain | `Send` |
//! |--------------------|----------------|--------|--------|
//! | [`LocalRef`]       | scoped         | yes    | no     |
//! | [`GlobalRef`]      | pinned         | yes    | yes    |
//! | [`PassLocalRef`]   | scoped, moved  | yes    | no     |
//! | [`WeakGlobalRef`]  | weak           | no     | yes    |
//!
//! The durable kinds and the transfer kind share one core; copying between
//! them re-derives a handle of the destination's strength from the source.
mod durable;
mod pass;
mod ref_core;
mod strength;
mod weak;

pub use durable::{GlobalRef, LocalRef, Ref};
pub use pass::PassLocalRef;
pub use strength::{HandleStrength, Pinned, Scoped, Strength};
pub use weak::WeakGlobalRef;

#[cfg(test)]
#[path = "scenario_test.rs"]
mod scenario_test;
