use std::{
    any::TypeId,
    collections::VecDeque,
    fmt::{self, Debug},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use arc_gc::{arc::GCArcWeak, traceable::GCTraceable};
use indexmap::IndexMap;

use crate::{error::VmError, finalizer::FinalizerQueue};

pub const STRING_CLASS: &str = "java/lang/String";
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// The native half of a bridged object, recorded on its managed peer.
///
/// `finalize` receives `address` once the managed peer has been collected.
#[derive(Clone, Copy)]
pub struct NativePeer {
    pub address: usize,
    pub type_id: TypeId,
    pub finalize: unsafe fn(usize),
}

impl NativePeer {
    #[inline(always)]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// # Safety
    /// `address` must still name the object that registered this peer.
    pub unsafe fn run_finalizer(self) {
        (self.finalize)(self.address)
    }
}

impl Debug for NativePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePeer({:#x})", self.address)
    }
}

#[derive(Clone)]
pub enum ManagedValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Object(GCArcWeak<ManagedCell>),
}

impl Debug for ManagedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedValue::Null => write!(f, "null"),
            ManagedValue::Boolean(b) => write!(f, "{}", b),
            ManagedValue::Integer(i) => write!(f, "{}", i),
            ManagedValue::Float(x) => write!(f, "{}", x),
            ManagedValue::Object(_) => write!(f, "<object>"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PrimitiveArray {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PrimitiveArray {
    pub fn len(&self) -> usize {
        match self {
            PrimitiveArray::Boolean(v) => v.len(),
            PrimitiveArray::Byte(v) => v.len(),
            PrimitiveArray::Short(v) => v.len(),
            PrimitiveArray::Int(v) => v.len(),
            PrimitiveArray::Long(v) => v.len(),
            PrimitiveArray::Float(v) => v.len(),
            PrimitiveArray::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            PrimitiveArray::Boolean(_) => "[Z",
            PrimitiveArray::Byte(_) => "[B",
            PrimitiveArray::Short(_) => "[S",
            PrimitiveArray::Int(_) => "[I",
            PrimitiveArray::Long(_) => "[J",
            PrimitiveArray::Float(_) => "[F",
            PrimitiveArray::Double(_) => "[D",
        }
    }
}

/// Element types that map onto a [`PrimitiveArray`] variant.
pub trait PrimitiveElement: Copy + Send + Sync + 'static {
    const CLASS_NAME: &'static str;
    fn into_array(values: Vec<Self>) -> PrimitiveArray;
    fn slice(array: &PrimitiveArray) -> Option<&[Self]>;
    fn slice_mut(array: &mut PrimitiveArray) -> Option<&mut [Self]>;
}

macro_rules! primitive_element {
    ($ty:ty, $variant:ident, $class:literal) => {
        impl PrimitiveElement for $ty {
            const CLASS_NAME: &'static str = $class;

            fn into_array(values: Vec<Self>) -> PrimitiveArray {
                PrimitiveArray::$variant(values)
            }

            fn slice(array: &PrimitiveArray) -> Option<&[Self]> {
                match array {
                    PrimitiveArray::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn slice_mut(array: &mut PrimitiveArray) -> Option<&mut [Self]> {
                match array {
                    PrimitiveArray::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

primitive_element!(bool, Boolean, "[Z");
primitive_element!(i8, Byte, "[B");
primitive_element!(i16, Short, "[S");
primitive_element!(i32, Int, "[I");
primitive_element!(i64, Long, "[J");
primitive_element!(f32, Float, "[F");
primitive_element!(f64, Double, "[D");

pub enum ManagedBody {
    Instance(IndexMap<Box<str>, ManagedValue>),
    String(Box<str>),
    PrimitiveArray(PrimitiveArray),
    ObjectArray(Vec<Option<GCArcWeak<ManagedCell>>>),
}

impl Debug for ManagedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedBody::Instance(fields) => f.debug_map().entries(fields.iter()).finish(),
            ManagedBody::String(s) => write!(f, "{:?}", s),
            ManagedBody::PrimitiveArray(array) => write!(f, "{:?}", array),
            ManagedBody::ObjectArray(elements) => write!(f, "<{} objects>", elements.len()),
        }
    }
}

#[derive(Debug)]
pub struct ManagedObject {
    class: Box<str>,
    body: ManagedBody,
    native: Option<NativePeer>,
}

impl ManagedObject {
    pub fn instance(class: &str) -> Self {
        ManagedObject {
            class: class.into(),
            body: ManagedBody::Instance(IndexMap::new()),
            native: None,
        }
    }

    pub fn string(value: &str) -> Self {
        ManagedObject {
            class: STRING_CLASS.into(),
            body: ManagedBody::String(value.into()),
            native: None,
        }
    }

    pub fn primitive_array(array: PrimitiveArray) -> Self {
        ManagedObject {
            class: array.class_name().into(),
            body: ManagedBody::PrimitiveArray(array),
            native: None,
        }
    }

    pub fn object_array(element_class: &str, len: usize) -> Self {
        ManagedObject {
            class: format!("[L{};", element_class).into(),
            body: ManagedBody::ObjectArray(vec![None; len]),
            native: None,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn body(&self) -> &ManagedBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ManagedBody {
        &mut self.body
    }

    pub fn native_peer(&self) -> Option<NativePeer> {
        self.native
    }

    pub fn set_native_peer(&mut self, peer: Option<NativePeer>) -> Option<NativePeer> {
        std::mem::replace(&mut self.native, peer)
    }

    pub(crate) fn type_error(&self, expected: &str) -> VmError {
        VmError::TypeMismatch {
            expected: expected.to_string(),
            found: self.class.to_string(),
        }
    }
}

impl GCTraceable<ManagedCell> for ManagedObject {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ManagedCell>>) {
        match &self.body {
            ManagedBody::Instance(fields) => {
                for value in fields.values() {
                    if let ManagedValue::Object(weak) = value {
                        queue.push_back(weak.clone());
                    }
                }
            }
            ManagedBody::ObjectArray(elements) => {
                queue.extend(elements.iter().flatten().cloned());
            }
            ManagedBody::String(_) | ManagedBody::PrimitiveArray(_) => {}
        }
    }
}

/// A heap slot. The collector owns one `GCArc` per cell; handle tables own
/// the rest.
pub struct ManagedCell {
    object: RwLock<ManagedObject>,
    finalizers: Arc<FinalizerQueue>,
}

impl ManagedCell {
    pub(crate) fn new(object: ManagedObject, finalizers: Arc<FinalizerQueue>) -> Self {
        ManagedCell {
            object: RwLock::new(object),
            finalizers,
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, ManagedObject>, VmError> {
        self.object
            .read()
            .map_err(|_| VmError::BorrowError("ManagedCell poisoned at `read`".to_string()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, ManagedObject>, VmError> {
        self.object
            .write()
            .map_err(|_| VmError::BorrowError("ManagedCell poisoned at `write`".to_string()))
    }

    #[inline(always)]
    pub fn with_data<T, F>(&self, f: F) -> Result<T, VmError>
    where
        F: FnOnce(&ManagedObject) -> Result<T, VmError>,
    {
        f(&*self.read()?)
    }

    #[inline(always)]
    pub fn with_data_mut<T, F>(&self, f: F) -> Result<T, VmError>
    where
        F: FnOnce(&mut ManagedObject) -> Result<T, VmError>,
    {
        f(&mut *self.write()?)
    }
}

impl GCTraceable<ManagedCell> for ManagedCell {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ManagedCell>>) {
        if let Ok(object) = self.object.read() {
            object.collect(queue);
        }
    }
}

impl Drop for ManagedCell {
    fn drop(&mut self) {
        let peer = match self.object.get_mut() {
            Ok(object) => object.native.take(),
            Err(poisoned) => poisoned.into_inner().native.take(),
        };
        if let Some(peer) = peer {
            self.finalizers.defer(peer);
        }
    }
}

impl Debug for ManagedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.object.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_element_dispatch() {
        let mut array = i32::into_array(vec![1, 2, 3]);
        assert_eq!(array.class_name(), "[I");
        assert_eq!(i32::slice(&array), Some(&[1, 2, 3][..]));
        assert!(f64::slice(&array).is_none());

        if let Some(values) = i32::slice_mut(&mut array) {
            values[1] = 20;
        }
        assert_eq!(array, PrimitiveArray::Int(vec![1, 20, 3]));
    }

    #[test]
    fn test_dropping_a_bound_cell_defers_its_finalizer() {
        unsafe fn noop(_: usize) {}

        let queue = Arc::new(FinalizerQueue::new());
        let mut object = ManagedObject::instance("demo/Peer");
        object.set_native_peer(Some(NativePeer {
            address: 0x40,
            type_id: TypeId::of::<u32>(),
            finalize: noop,
        }));
        drop(ManagedCell::new(object, queue.clone()));
        assert_eq!(queue.len(), 1);

        drop(ManagedCell::new(ManagedObject::string("x"), queue.clone()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.process_all(), 1);
    }

    #[test]
    fn test_object_array_class_name() {
        let array = ManagedObject::object_array(STRING_CLASS, 2);
        assert_eq!(array.class(), "[Ljava/lang/String;");
        assert!(matches!(array.body(), ManagedBody::ObjectArray(items) if items.len() == 2));
    }
}
