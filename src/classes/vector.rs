use std::sync::{Mutex, MutexGuard, PoisonError};

use peerref_core::{AnyObject, BridgeError, GlobalRef, ManagedClass, NativeObject, PassLocalRef};

use super::JString;

/// `java/util/Vector`, holding its elements through pinned handles.
pub struct JVector {
    items: Mutex<Vec<GlobalRef<dyn AnyObject>>>,
}

impl ManagedClass for JVector {
    const CLASS_NAME: &'static str = "java/util/Vector";
}

impl JVector {
    pub fn create(capacity: usize) -> PassLocalRef<NativeObject<JVector>> {
        NativeObject::new(JVector {
            items: Mutex::new(Vec::with_capacity(capacity)),
        })
    }

    fn items(&self) -> MutexGuard<'_, Vec<GlobalRef<dyn AnyObject>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, item: PassLocalRef<dyn AnyObject>) {
        self.items().push(GlobalRef::from(item));
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn get(&self, index: usize) -> PassLocalRef<dyn AnyObject> {
        self.items()
            .get(index)
            .map_or_else(PassLocalRef::null, |item| item.to_pass())
    }

    /// Reads every element as a string.
    pub fn strings(&self) -> Result<Vec<String>, BridgeError> {
        self.items()
            .iter()
            .map(|item| JString::value(item.raw()))
            .collect()
    }
}
