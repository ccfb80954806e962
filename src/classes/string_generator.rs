use std::sync::{
    atomic::{AtomicI32, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use peerref_core::{
    AnyObject, BridgeError, GlobalRef, ManagedClass, NativeObject, PassLocalRef, WeakGlobalRef,
};

use super::{JString, JVector, StringGeneratorClient};

type ClientObject = NativeObject<StringGeneratorClient>;

pub struct StringGenerator {
    mutable_static: AtomicI32,
    mutable: AtomicI32,
    another_mutable: AtomicI32,
    client: Mutex<GlobalRef<ClientObject>>,
    what: Mutex<WeakGlobalRef<dyn AnyObject>>,
}

impl ManagedClass for StringGenerator {
    const CLASS_NAME: &'static str = "com/example/test/StringGenerator";
}

impl Drop for StringGenerator {
    fn drop(&mut self) {
        log::debug!("StringGenerator is being destroyed");
    }
}

impl StringGenerator {
    pub const NUMBER: i32 = 1627;

    pub fn create() -> PassLocalRef<NativeObject<StringGenerator>> {
        NativeObject::new(StringGenerator {
            mutable_static: AtomicI32::new(2015),
            mutable: AtomicI32::new(0),
            another_mutable: AtomicI32::new(0),
            client: Mutex::new(GlobalRef::null()),
            what: Mutex::new(WeakGlobalRef::null()),
        })
    }

    fn client(&self) -> MutexGuard<'_, GlobalRef<ClientObject>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn what(&self) -> MutexGuard<'_, WeakGlobalRef<dyn AnyObject>> {
        self.what.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generate_number_for_jni(&self, value: i32) {
        self.mutable.store(value, Ordering::Relaxed);
    }

    pub fn another_mutable(&self) -> i32 {
        self.another_mutable.load(Ordering::Relaxed)
    }

    pub fn string_from_jni(&self) -> String {
        let from_static = self.mutable_static.load(Ordering::Relaxed);
        let from_instance = self.mutable.load(Ordering::Relaxed);
        let sum = Self::NUMBER
            .wrapping_add(from_static)
            .wrapping_add(from_instance);
        self.another_mutable.store(sum, Ordering::Relaxed);
        format!(
            "Hello from JNI! #{} + {} + {} = {}",
            Self::NUMBER,
            from_static,
            from_instance,
            sum
        )
    }

    pub fn set_client(&self, name: &str, client: PassLocalRef<ClientObject>) {
        log::debug!("StringGenerator::set_client name={}, client={:?}", name, client);
        *self.client() = GlobalRef::from(client);
    }

    pub fn native_get_client(&self) -> PassLocalRef<dyn AnyObject> {
        let client = self.client();
        if client.is_null() {
            return PassLocalRef::null();
        }
        client.to_pass().into_any()
    }

    pub fn set_what(&self, what: PassLocalRef<dyn AnyObject>) {
        log::debug!("StringGenerator::set_what what={:?}", what);
        *self.what() = WeakGlobalRef::from(what);
    }

    /// Sends a greeting to the client, then the same greeting wrapped in a
    /// vector, then a note through the weak "what" target if it is still a
    /// live client. Returns whether the weak target was reached.
    pub fn request_string_from_jni(&self) -> Result<bool, BridgeError> {
        let result = self.string_from_jni();
        let client = self.client().clone();
        let Some(receiver) = client.get_ptr() else {
            log::warn!("No client set; dropping \"{}\"", result);
            return Ok(false);
        };
        receiver.string_from_jni(&result);

        let vector = JVector::create(10);
        if let Some(items) = vector.get_ptr() {
            items.add(JString::create(&result)?);
            receiver.strings_from_jni(items)?;
        }
        drop(vector);

        let weak_client = self.what().try_promote_as::<ClientObject>();
        match weak_client.get_ptr() {
            Some(weak_client) => {
                weak_client.string_from_jni("Called from weak client...");
                Ok(true)
            }
            None => {
                log::debug!("Failed to promote weak client...");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::JLong;
    use peerref_core::{
        context::{use_backend, BackendKind},
        LocalRef,
    };

    #[test]
    fn test_request_reaches_client_three_ways() {
        let _backend = use_backend(BackendKind::Native);
        let generator = StringGenerator::create();
        let client = GlobalRef::from(StringGeneratorClient::create());
        let generator = generator.get_ptr().unwrap();

        generator.set_client("main", client.to_pass());
        generator.set_what(client.to_pass().into_any());
        generator.generate_number_for_jni(1000);

        assert!(generator.request_string_from_jni().unwrap());
        let expected = "Hello from JNI! #1627 + 2015 + 1000 = 4642";
        assert_eq!(
            client.get_ptr().unwrap().received(),
            vec![
                expected.to_string(),
                format!("[{}]", expected),
                "Called from weak client...".to_string(),
            ]
        );
        assert_eq!(generator.another_mutable(), 4642);
        assert!(!generator.native_get_client().is_null());
    }

    #[test]
    fn test_weak_target_of_another_type_is_not_promoted() {
        let _backend = use_backend(BackendKind::Native);
        let generator = StringGenerator::create();
        let generator = generator.get_ptr().unwrap();
        let client = StringGeneratorClient::create();
        let other = LocalRef::from(JLong::create(5));

        generator.set_client("main", client);
        generator.set_what(other.to_pass().into_any());
        assert!(!generator.request_string_from_jni().unwrap());
    }
}
