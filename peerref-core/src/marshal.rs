//! Conversions at the call boundary.

use std::{any::Any, sync::Arc};

use peerref_vm::{RawRef, RefKind};

use crate::{
    any_object::{AnyObject, Bridgeable},
    attach,
    context::BackendKind,
    error::BridgeError,
    handles::PassLocalRef,
    object_reference::{self, ObjectReference},
};

/// New string on this thread's backend, as a handle-only transfer.
pub fn string_to_managed(value: &str) -> Result<PassLocalRef<dyn AnyObject>, BridgeError> {
    let raw = match BackendKind::current() {
        BackendKind::Managed => {
            let env = attach::get_env().ok_or(BridgeError::Detached)?;
            env.new_string_utf(value)?
        }
        BackendKind::Native => ObjectReference::create(Arc::new(value.to_string())),
    };
    Ok(PassLocalRef::<dyn AnyObject>::from_handle(raw))
}

/// Contents of the string behind `raw`. NULL reads as the empty string.
pub fn string_to_native(raw: RawRef) -> Result<String, BridgeError> {
    if raw.is_null() {
        return Ok(String::new());
    }
    if raw.kind() == RefKind::Native {
        return shared::<String>(raw)
            .map(|value| value.as_ref().clone())
            .ok_or(BridgeError::TypeMismatch { expected: "String" });
    }
    let env = attach::get_env().ok_or(BridgeError::Detached)?;
    Ok(env.get_string_utf_chars(raw)?)
}

/// Releases `pass` into a raw scoped handle for the runtime to own.
pub fn to_managed<T: ?Sized + AnyObject>(mut pass: PassLocalRef<T>) -> RawRef {
    pass.leak()
}

/// Resolves the object behind the caller's handle. The caller keeps `raw`.
pub fn to_native<T: Bridgeable>(raw: RawRef) -> PassLocalRef<T> {
    if raw.is_null() {
        return PassLocalRef::null();
    }
    T::from_ref(crate::refs::ref_local(raw))
}

/// Handle-only counterpart of [`to_native`].
pub fn to_native_any(raw: RawRef) -> PassLocalRef<dyn AnyObject> {
    PassLocalRef::from_raw(raw)
}

/// Wraps an arbitrary shared payload in a native record.
pub fn share<T: Any + Send + Sync>(value: Arc<T>) -> PassLocalRef<dyn AnyObject> {
    PassLocalRef::<dyn AnyObject>::from_handle(ObjectReference::create(value))
}

/// The payload behind a native handle, if it is a `T` and still alive.
pub fn shared<T: Any + Send + Sync>(raw: RawRef) -> Option<Arc<T>> {
    object_reference::share_ptr(raw)?.downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::use_backend, handles::WeakGlobalRef, test_support};

    #[test]
    fn test_strings_cross_on_both_backends() {
        let _runtime = test_support::runtime();
        for backend in [BackendKind::Managed, BackendKind::Native] {
            let _guard = use_backend(backend);
            let text = string_to_managed("Hello from JNI! #1").unwrap();
            assert_eq!(string_to_native(text.raw()).unwrap(), "Hello from JNI! #1");

            let raw = to_managed(text);
            assert_eq!(string_to_native(raw).unwrap(), "Hello from JNI! #1");
            crate::refs::deref_local(raw);
        }
        assert_eq!(string_to_native(RawRef::NULL).unwrap(), "");
    }

    #[test]
    fn test_shared_payload_survives_without_handles() {
        let payload = Arc::new(vec![1u32, 2, 3]);
        let weak: WeakGlobalRef<dyn AnyObject> = WeakGlobalRef::from(share(payload.clone()));
        assert!(!weak.is_expired());

        let revived = weak.try_promote_any();
        let seen = shared::<Vec<u32>>(revived.raw()).unwrap();
        assert!(Arc::ptr_eq(&seen, &payload));
        assert!(shared::<String>(revived.raw()).is_none());
        drop((seen, revived));

        drop(payload);
        assert!(weak.is_expired());
        assert!(weak.try_promote_any().is_null());
    }

    #[test]
    fn test_native_string_payload_type_is_checked() {
        let numbers = share(Arc::new(42u8));
        assert_eq!(
            string_to_native(numbers.raw()),
            Err(BridgeError::TypeMismatch { expected: "String" })
        );
        let any = to_native_any(numbers.raw());
        assert!(!any.is_null());
    }
}
