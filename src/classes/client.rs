use std::sync::{Mutex, PoisonError};

use peerref_core::{BridgeError, ManagedClass, NativeObject, PassLocalRef};

use super::JVector;

/// Receives strings produced by a [`StringGenerator`](super::StringGenerator).
#[derive(Default)]
pub struct StringGeneratorClient {
    received: Mutex<Vec<String>>,
}

impl ManagedClass for StringGeneratorClient {
    const CLASS_NAME: &'static str = "com/example/test/StringGeneratorClient";
}

impl StringGeneratorClient {
    pub fn create() -> PassLocalRef<NativeObject<StringGeneratorClient>> {
        NativeObject::new(StringGeneratorClient::default())
    }

    fn record(&self, value: String) {
        log::debug!("String from JNI: {}", value);
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    pub fn string_from_jni(&self, value: &str) {
        self.record(value.to_string());
    }

    /// Records the vector the way `Vector.toString()` prints it.
    pub fn strings_from_jni(&self, values: &JVector) -> Result<(), BridgeError> {
        let strings = values.strings()?;
        self.record(format!("[{}]", strings.join(", ")));
        Ok(())
    }

    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
