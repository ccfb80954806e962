use peerref_core::{marshal, AnyObject, BridgeError, PassLocalRef, RawRef};

/// `java/lang/String`. Strings have no native half; they cross as handles.
pub struct JString;

impl JString {
    pub const CLASS_NAME: &'static str = "java/lang/String";

    pub fn create(value: &str) -> Result<PassLocalRef<dyn AnyObject>, BridgeError> {
        marshal::string_to_managed(value)
    }

    pub fn value(raw: RawRef) -> Result<String, BridgeError> {
        marshal::string_to_native(raw)
    }
}
