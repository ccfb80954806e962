//! Array transfer.
//!
//! A [`PassArray`] owns one scoped handle to an array, either a runtime
//! array or a native record holding an `Arc<Vec<T>>`, and reads the
//! elements at most once.

use std::{cell::OnceCell, marker::PhantomData, sync::Arc};

use peerref_vm::{object::STRING_CLASS, Env, RawRef, RefKind, VmError};

use crate::{
    attach,
    context::BackendKind,
    error::BridgeError,
    object_reference::{self, ObjectReference},
    refs,
};

/// Element types an array can carry across the boundary.
pub trait ArrayElement: Clone + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn new_managed(env: &Env, values: &[Self]) -> Result<RawRef, VmError>;

    fn read_managed(env: &Env, raw: RawRef) -> Result<Vec<Self>, VmError>;
}

macro_rules! primitive_array_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn new_managed(env: &Env, values: &[Self]) -> Result<RawRef, VmError> {
                    env.new_primitive_array(values)
                }

                fn read_managed(env: &Env, raw: RawRef) -> Result<Vec<Self>, VmError> {
                    env.get_primitive_array_region(raw)
                }
            }
        )*
    };
}

primitive_array_element!(bool, i8, i16, i32, i64, f32, f64);

impl ArrayElement for String {
    const TYPE_NAME: &'static str = "String";

    fn new_managed(env: &Env, values: &[Self]) -> Result<RawRef, VmError> {
        let array = env.new_object_array(STRING_CLASS, values.len())?;
        for (index, value) in values.iter().enumerate() {
            let element = env.new_string_utf(value)?;
            let stored = env.set_object_array_element(array, index, element);
            env.delete_local_ref(element)?;
            stored?;
        }
        Ok(array)
    }

    fn read_managed(env: &Env, raw: RawRef) -> Result<Vec<Self>, VmError> {
        let len = env.get_array_length(raw)?;
        let mut values = Vec::with_capacity(len);
        for index in 0..len {
            let element = env.get_object_array_element(raw, index)?;
            if element.is_null() {
                values.push(String::new());
                continue;
            }
            let value = env.get_string_utf_chars(element);
            env.delete_local_ref(element)?;
            values.push(value?);
        }
        Ok(values)
    }
}

pub struct PassArray<T: ArrayElement> {
    raw: RawRef,
    data: OnceCell<Vec<T>>,
    _thread_bound: PhantomData<*const ()>,
}

impl<T: ArrayElement> PassArray<T> {
    fn with_raw(raw: RawRef, data: OnceCell<Vec<T>>) -> Self {
        PassArray {
            raw,
            data,
            _thread_bound: PhantomData,
        }
    }

    /// Copies `values` into a new array on this thread's backend.
    pub fn from_slice(values: &[T]) -> Result<Self, BridgeError> {
        let raw = match BackendKind::current() {
            BackendKind::Managed => {
                let env = attach::get_env().ok_or(BridgeError::Detached)?;
                T::new_managed(&env, values)?
            }
            BackendKind::Native => ObjectReference::create(Arc::new(values.to_vec())),
        };
        Ok(Self::with_raw(raw, OnceCell::from(values.to_vec())))
    }

    /// Takes a new scoped handle to an existing array. The caller keeps
    /// `raw`.
    pub fn from_ref(raw: RawRef) -> Self {
        Self::with_raw(refs::ref_local(raw), OnceCell::new())
    }

    #[inline]
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Elements, read from the backend on first use. A NULL array is empty.
    pub fn data(&self) -> Result<&[T], BridgeError> {
        if let Some(values) = self.data.get() {
            return Ok(values);
        }
        let values = self.read()?;
        Ok(self.data.get_or_init(move || values))
    }

    fn read(&self) -> Result<Vec<T>, BridgeError> {
        if self.raw.is_null() {
            return Ok(Vec::new());
        }
        if self.raw.kind() == RefKind::Native {
            let payload = object_reference::share_ptr(self.raw).ok_or(BridgeError::Expired)?;
            let values = payload
                .downcast::<Vec<T>>()
                .map_err(|_| BridgeError::TypeMismatch {
                    expected: T::TYPE_NAME,
                })?;
            return Ok(values.as_ref().clone());
        }
        let env = attach::get_env().ok_or(BridgeError::Detached)?;
        Ok(T::read_managed(&env, self.raw)?)
    }

    pub fn len(&self) -> Result<usize, BridgeError> {
        self.data().map(<[T]>::len)
    }

    pub fn is_empty(&self) -> Result<bool, BridgeError> {
        self.data().map(<[T]>::is_empty)
    }

    pub fn get(&self, index: usize) -> Result<Option<&T>, BridgeError> {
        self.data().map(|values| values.get(index))
    }

    pub fn to_vec(&self) -> Result<Vec<T>, BridgeError> {
        self.data().map(<[T]>::to_vec)
    }

    /// Hands the scoped handle to the caller.
    pub fn leak(mut self) -> RawRef {
        std::mem::take(&mut self.raw)
    }
}

impl<T: ArrayElement> Clone for PassArray<T> {
    fn clone(&self) -> Self {
        Self::with_raw(refs::ref_local(self.raw), self.data.clone())
    }
}

impl<T: ArrayElement> Drop for PassArray<T> {
    fn drop(&mut self) {
        refs::deref_local(std::mem::take(&mut self.raw));
    }
}
