//! Backend dispatch for raw handle values.
//!
//! Native handles go to [`object_reference`], managed handles to the
//! thread's [`Env`](peerref_vm::Env). Failures are logged and surface as
//! NULL or `false`, which is how the handle types above expect them.

use peerref_vm::{NativePeer, RawRef, RawWeak, RefKind, VmError};

use crate::{
    attach,
    context::BackendKind,
    object_reference,
};

#[inline(always)]
fn is_native(bits: u64) -> bool {
    RawRef::from_bits(bits).kind() == RefKind::Native
}

fn logged<T>(op: &str, raw: impl std::fmt::Debug, result: Result<T, VmError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("{} failed for {:?}: {}", op, raw, e);
            None
        }
    }
}

/// New scoped handle to whatever `raw` names. NULL when `raw` is NULL, an
/// expired weak value, or unusable on this thread.
pub fn ref_local(raw: RawRef) -> RawRef {
    if raw.is_null() {
        return RawRef::NULL;
    }
    #[cfg(feature = "debug")]
    log::trace!("ref_local {:?}", raw);
    if is_native(raw.bits()) {
        return object_reference::ref_local(raw);
    }
    attach::get_env()
        .and_then(|env| logged("NewLocalRef", raw, env.new_local_ref(raw)))
        .unwrap_or(RawRef::NULL)
}

pub fn deref_local(raw: RawRef) {
    if raw.is_null() {
        return;
    }
    #[cfg(feature = "debug")]
    log::trace!("deref_local {:?}", raw);
    if is_native(raw.bits()) {
        return object_reference::deref_local(raw);
    }
    if let Some(env) = attach::get_env() {
        logged("DeleteLocalRef", raw, env.delete_local_ref(raw));
    }
}

pub fn ref_global(raw: RawRef) -> RawRef {
    if raw.is_null() {
        return RawRef::NULL;
    }
    #[cfg(feature = "debug")]
    log::trace!("ref_global {:?}", raw);
    if is_native(raw.bits()) {
        return object_reference::ref_global(raw);
    }
    attach::get_env()
        .and_then(|env| logged("NewGlobalRef", raw, env.new_global_ref(raw)))
        .unwrap_or(RawRef::NULL)
}

pub fn deref_global(raw: RawRef) {
    if raw.is_null() {
        return;
    }
    #[cfg(feature = "debug")]
    log::trace!("deref_global {:?}", raw);
    if is_native(raw.bits()) {
        return object_reference::deref_global(raw);
    }
    if let Some(env) = attach::get_env() {
        logged("DeleteGlobalRef", raw, env.delete_global_ref(raw));
    }
}

pub fn ref_weak_global(raw: RawRef) -> RawWeak {
    if raw.is_null() {
        return RawWeak::NULL;
    }
    #[cfg(feature = "debug")]
    log::trace!("ref_weak_global {:?}", raw);
    if is_native(raw.bits()) {
        return object_reference::ref_weak(raw);
    }
    attach::get_env()
        .and_then(|env| logged("NewWeakGlobalRef", raw, env.new_weak_global_ref(raw)))
        .unwrap_or(RawWeak::NULL)
}

pub fn deref_weak_global(weak: RawWeak) {
    if weak.is_null() {
        return;
    }
    #[cfg(feature = "debug")]
    log::trace!("deref_weak_global {:?}", weak);
    if is_native(weak.bits()) {
        return object_reference::deref_weak(weak);
    }
    if let Some(env) = attach::get_env() {
        logged("DeleteWeakGlobalRef", weak, env.delete_weak_global_ref(weak));
    }
}

/// NULL and unresolvable values count as expired.
pub fn is_expired_weak_global(weak: RawWeak) -> bool {
    if weak.is_null() {
        return true;
    }
    if is_native(weak.bits()) {
        return object_reference::is_expired(weak);
    }
    attach::get_env().map_or(true, |env| env.is_weak_expired(weak))
}

/// Address of the object behind `raw`, stable while it is alive.
pub fn identity(raw: RawRef) -> Option<usize> {
    if raw.is_null() {
        return None;
    }
    if is_native(raw.bits()) {
        return object_reference::identity(raw);
    }
    attach::get_env().and_then(|env| env.identity(raw))
}

pub fn is_same_object(a: RawRef, b: RawRef) -> bool {
    if !is_native(a.bits()) && !is_native(b.bits()) {
        if let Some(env) = attach::get_env() {
            return env.is_same_object(a, b);
        }
    }
    identity(a) == identity(b)
}

pub fn native_peer(raw: RawRef) -> Option<NativePeer> {
    if raw.is_null() {
        return None;
    }
    if is_native(raw.bits()) {
        return object_reference::native_peer(raw);
    }
    attach::get_env()
        .and_then(|env| logged("GetNativePeer", raw, env.native_peer(raw)))
        .flatten()
}

pub fn bind_native_peer(raw: RawRef, peer: NativePeer) -> bool {
    if raw.is_null() {
        return false;
    }
    if is_native(raw.bits()) {
        return object_reference::bind_native_peer(raw, peer);
    }
    attach::get_env()
        .and_then(|env| logged("SetNativePeer", raw, env.set_native_peer(raw, Some(peer))))
        .is_some()
}

/// Clears the peer binding behind `weak` if it still names `address`. A
/// collected peer has nothing to clear.
pub fn unbind_native_peer(weak: RawWeak, address: usize) {
    if weak.is_null() {
        return;
    }
    if is_native(weak.bits()) {
        return object_reference::unbind_native_peer(weak, address);
    }
    let Some(env) = attach::get_env() else {
        return;
    };
    let raw = RawRef::from(weak);
    if let Ok(Some(peer)) = env.native_peer(raw) {
        if peer.address == address {
            logged("SetNativePeer", raw, env.set_native_peer(raw, None));
        }
    }
}

/// Creates a peer object of `class` on this thread's backend and returns a
/// scoped handle to it.
pub fn new_peer(class: &str) -> RawRef {
    match BackendKind::current() {
        BackendKind::Native => object_reference::new_peer(class),
        BackendKind::Managed => attach::get_env()
            .and_then(|env| logged("NewObject", class, env.new_object(class)))
            .unwrap_or(RawRef::NULL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::use_backend, test_support};

    #[test]
    fn test_null_is_inert() {
        assert_eq!(ref_local(RawRef::NULL), RawRef::NULL);
        assert_eq!(ref_global(RawRef::NULL), RawRef::NULL);
        assert_eq!(ref_weak_global(RawRef::NULL), RawWeak::NULL);
        assert!(is_expired_weak_global(RawWeak::NULL));
        assert!(is_same_object(RawRef::NULL, RawRef::NULL));
        deref_local(RawRef::NULL);
        deref_weak_global(RawWeak::NULL);
    }

    #[test]
    fn test_managed_handles_resolve_to_one_object() {
        let _runtime = test_support::runtime();
        let _backend = use_backend(BackendKind::Managed);
        let local = new_peer("demo/Thing");
        assert_eq!(local.kind(), RefKind::Local);

        let global = ref_global(local);
        let weak = ref_weak_global(local);
        assert_eq!(global.kind(), RefKind::Global);
        assert!(is_same_object(local, global));
        assert!(is_same_object(global, weak.into()));
        assert_eq!(identity(local), identity(global));

        deref_local(local);
        assert!(!is_expired_weak_global(weak));
        deref_global(global);
        deref_weak_global(weak);
    }

    #[test]
    fn test_native_handles_dispatch_to_records() {
        let _backend = use_backend(BackendKind::Native);
        let local = new_peer("demo/Thing");
        assert_eq!(local.kind(), RefKind::Native);
        let weak = ref_weak_global(local);
        let second = ref_local(local);
        assert_eq!(second, local);

        deref_local(local);
        assert!(!is_expired_weak_global(weak));
        deref_local(second);
        assert!(is_expired_weak_global(weak));
        assert_eq!(ref_local(weak.into()), RawRef::NULL);
        deref_weak_global(weak);
    }
}
