use peerref_core::{ManagedClass, NativeObject, PassLocalRef};

pub struct JLong {
    value: i64,
}

impl ManagedClass for JLong {
    const CLASS_NAME: &'static str = "java/lang/Long";
}

impl JLong {
    pub fn create(value: i64) -> PassLocalRef<NativeObject<JLong>> {
        NativeObject::new(JLong { value })
    }

    pub fn long_value(&self) -> i64 {
        self.value
    }
}
