//! Thread-bound access to a [`Runtime`].
//!
//! An [`Env`] is what native code holds while it works with managed
//! objects. It creates and releases handles and allocates objects, strings
//! and arrays. Every object it returns is a new local reference in the
//! current frame.

use std::{marker::PhantomData, sync::Arc};

use arc_gc::arc::GCArc;

use crate::{
    error::VmError,
    handle::{RawRef, RawWeak, RefKind},
    object::{
        ManagedBody, ManagedCell, ManagedObject, ManagedValue, NativePeer, PrimitiveElement,
        STRING_CLASS,
    },
    runtime::Runtime,
    thread::{self, LocalTable},
};

/// Field values as seen from native code. Objects travel as local handles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Object(RawRef),
}

pub struct Env {
    runtime: Arc<Runtime>,
    _thread_bound: PhantomData<*const ()>,
}

impl Env {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Env {
            runtime,
            _thread_bound: PhantomData,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn with_locals<R>(&self, f: impl FnOnce(&mut LocalTable) -> R) -> Result<R, VmError> {
        thread::with_state(self.runtime.id(), |state| f(&mut state.locals))
            .ok_or(VmError::NotAttached)
    }

    /// Resolves a local, global or weak handle to its heap cell. NULL and
    /// collected weak referents yield `Ok(None)`.
    fn resolve(&self, raw: RawRef) -> Result<Option<GCArc<ManagedCell>>, VmError> {
        if raw.is_null() {
            return Ok(None);
        }
        match raw.kind() {
            RefKind::Local => {
                let slot = raw.slot(RefKind::Local).ok_or(VmError::InvalidHandle(raw))?;
                self.with_locals(|locals| locals.get(slot).cloned())?
                    .map(Some)
                    .ok_or(VmError::InvalidHandle(raw))
            }
            RefKind::Global => {
                let slot = raw.slot(RefKind::Global).ok_or(VmError::InvalidHandle(raw))?;
                self.runtime
                    .globals()
                    .get(slot)
                    .cloned()
                    .map(Some)
                    .ok_or(VmError::InvalidHandle(raw))
            }
            RefKind::WeakGlobal => {
                let slot = raw
                    .slot(RefKind::WeakGlobal)
                    .ok_or(VmError::InvalidHandle(raw))?;
                let weak = self
                    .runtime
                    .weak_globals()
                    .get(slot)
                    .cloned()
                    .ok_or(VmError::InvalidHandle(raw))?;
                Ok(weak.upgrade())
            }
            RefKind::Native => Err(VmError::WrongHandleKind {
                expected: RefKind::Local,
                found: RefKind::Native,
            }),
        }
    }

    fn resolve_live(&self, raw: RawRef) -> Result<GCArc<ManagedCell>, VmError> {
        self.resolve(raw)?.ok_or(VmError::InvalidHandle(raw))
    }

    fn add_local(&self, arc: GCArc<ManagedCell>) -> Result<RawRef, VmError> {
        let slot = self.with_locals(|locals| locals.insert(arc))?;
        let raw = RawRef::managed(RefKind::Local, slot);
        #[cfg(feature = "debug")]
        log::trace!("Added local {:?}", raw);
        Ok(raw)
    }

    fn allocate_local(&self, object: ManagedObject) -> Result<RawRef, VmError> {
        let arc = self.runtime.allocate(object);
        self.add_local(arc)
    }

    // ---- references -------------------------------------------------------

    /// New local reference to whatever `raw` names. Returns NULL for NULL or
    /// for a weak reference whose referent was collected.
    pub fn new_local_ref(&self, raw: RawRef) -> Result<RawRef, VmError> {
        match self.resolve(raw)? {
            Some(arc) => self.add_local(arc),
            None => Ok(RawRef::NULL),
        }
    }

    pub fn delete_local_ref(&self, raw: RawRef) -> Result<(), VmError> {
        if raw.is_null() {
            return Ok(());
        }
        let slot = raw.slot(RefKind::Local).ok_or(VmError::WrongHandleKind {
            expected: RefKind::Local,
            found: raw.kind(),
        })?;
        let removed = self.with_locals(|locals| locals.remove(slot))?;
        #[cfg(feature = "debug")]
        log::trace!("Deleted local {:?} (found: {})", raw, removed.is_some());
        match removed {
            Some(arc) => {
                drop(arc);
                Ok(())
            }
            None => Err(VmError::InvalidHandle(raw)),
        }
    }

    pub fn new_global_ref(&self, raw: RawRef) -> Result<RawRef, VmError> {
        match self.resolve(raw)? {
            Some(arc) => {
                let slot = self.runtime.globals().insert(arc);
                Ok(RawRef::managed(RefKind::Global, slot))
            }
            None => Ok(RawRef::NULL),
        }
    }

    pub fn delete_global_ref(&self, raw: RawRef) -> Result<(), VmError> {
        if raw.is_null() {
            return Ok(());
        }
        let slot = raw.slot(RefKind::Global).ok_or(VmError::WrongHandleKind {
            expected: RefKind::Global,
            found: raw.kind(),
        })?;
        let removed = self.runtime.globals().remove(slot);
        removed.map(drop).ok_or(VmError::InvalidHandle(raw))
    }

    pub fn new_weak_global_ref(&self, raw: RawRef) -> Result<RawWeak, VmError> {
        match self.resolve(raw)? {
            Some(arc) => {
                let slot = self.runtime.weak_globals().insert(arc.as_weak());
                Ok(RawWeak::managed(slot))
            }
            None => Ok(RawWeak::NULL),
        }
    }

    pub fn delete_weak_global_ref(&self, weak: RawWeak) -> Result<(), VmError> {
        if weak.is_null() {
            return Ok(());
        }
        let slot = weak
            .slot(RefKind::WeakGlobal)
            .ok_or(VmError::WrongHandleKind {
                expected: RefKind::WeakGlobal,
                found: weak.kind(),
            })?;
        let removed = self.runtime.weak_globals().remove(slot);
        removed.map(drop).ok_or(VmError::InvalidHandle(weak.into()))
    }

    /// True once the referent of `weak` has been collected. A NULL or
    /// unknown weak value counts as expired.
    pub fn is_weak_expired(&self, weak: RawWeak) -> bool {
        !matches!(self.resolve(weak.into()), Ok(Some(_)))
    }

    /// Identity comparison, NULL-aware: a collected weak referent equals
    /// NULL.
    pub fn is_same_object(&self, a: RawRef, b: RawRef) -> bool {
        let a = self.resolve(a).ok().flatten();
        let b = self.resolve(b).ok().flatten();
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => cell_address(&a) == cell_address(&b),
            _ => false,
        }
    }

    /// Stable address of the referent, if it is alive.
    pub fn identity(&self, raw: RawRef) -> Option<usize> {
        self.resolve(raw).ok().flatten().map(|arc| cell_address(&arc))
    }

    // ---- local frames -----------------------------------------------------

    pub fn push_local_frame(&self) -> Result<(), VmError> {
        self.with_locals(|locals| locals.push_frame())
    }

    /// Releases every local created since the matching push. `result`, if
    /// not NULL, is re-created as a local in the outer frame and returned.
    pub fn pop_local_frame(&self, result: RawRef) -> Result<RawRef, VmError> {
        let survivor = self.resolve(result)?;
        let released = self
            .with_locals(|locals| locals.pop_frame())?
            .ok_or(VmError::FrameUnderflow)?;
        log::trace!("Popped local frame ({} references released)", released.len());
        drop(released);
        match survivor {
            Some(arc) => self.add_local(arc),
            None => Ok(RawRef::NULL),
        }
    }

    /// Opens a frame that is popped when the guard drops.
    pub fn local_frame(&self) -> Result<LocalFrame<'_>, VmError> {
        self.push_local_frame()?;
        Ok(LocalFrame {
            env: self,
            open: true,
        })
    }

    pub fn local_frame_depth(&self) -> usize {
        self.with_locals(|locals| locals.depth()).unwrap_or(0)
    }

    pub fn local_ref_count(&self) -> usize {
        self.with_locals(|locals| locals.len()).unwrap_or(0)
    }

    // ---- objects ----------------------------------------------------------

    pub fn new_object(&self, class: &str) -> Result<RawRef, VmError> {
        self.allocate_local(ManagedObject::instance(class))
    }

    pub fn class_name(&self, raw: RawRef) -> Result<String, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data(|object| Ok(object.class().to_string()))
    }

    pub fn set_field(&self, raw: RawRef, name: &str, value: FieldValue) -> Result<(), VmError> {
        let value = match value {
            FieldValue::Null => ManagedValue::Null,
            FieldValue::Boolean(b) => ManagedValue::Boolean(b),
            FieldValue::Integer(i) => ManagedValue::Integer(i),
            FieldValue::Float(x) => ManagedValue::Float(x),
            FieldValue::Object(target) => match self.resolve(target)? {
                Some(arc) => ManagedValue::Object(arc.as_weak()),
                None => ManagedValue::Null,
            },
        };
        self.resolve_live(raw)?
            .as_ref()
            .with_data_mut(|object| match object.body_mut() {
                ManagedBody::Instance(fields) => {
                    fields.insert(name.into(), value);
                    Ok(())
                }
                _ => Err(object.type_error("instance")),
            })
    }

    /// Reads a field. Object fields come back as new local references.
    pub fn get_field(&self, raw: RawRef, name: &str) -> Result<FieldValue, VmError> {
        let value = self
            .resolve_live(raw)?
            .as_ref()
            .with_data(|object| match object.body() {
                ManagedBody::Instance(fields) => fields
                    .get(name)
                    .cloned()
                    .ok_or_else(|| VmError::NoSuchField(name.to_string())),
                _ => Err(object.type_error("instance")),
            })?;
        Ok(match value {
            ManagedValue::Null => FieldValue::Null,
            ManagedValue::Boolean(b) => FieldValue::Boolean(b),
            ManagedValue::Integer(i) => FieldValue::Integer(i),
            ManagedValue::Float(x) => FieldValue::Float(x),
            ManagedValue::Object(weak) => match weak.upgrade() {
                Some(arc) => FieldValue::Object(self.add_local(arc)?),
                None => FieldValue::Null,
            },
        })
    }

    pub fn native_peer(&self, raw: RawRef) -> Result<Option<NativePeer>, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data(|object| Ok(object.native_peer()))
    }

    /// Records (or clears) the native half of `raw`. Returns the previous
    /// binding.
    pub fn set_native_peer(
        &self,
        raw: RawRef,
        peer: Option<NativePeer>,
    ) -> Result<Option<NativePeer>, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data_mut(|object| Ok(object.set_native_peer(peer)))
    }

    // ---- strings ----------------------------------------------------------

    pub fn new_string_utf(&self, value: &str) -> Result<RawRef, VmError> {
        self.allocate_local(ManagedObject::string(value))
    }

    pub fn get_string_utf_chars(&self, raw: RawRef) -> Result<String, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data(|object| match object.body() {
                ManagedBody::String(s) => Ok(s.to_string()),
                _ => Err(object.type_error(STRING_CLASS)),
            })
    }

    // ---- arrays -----------------------------------------------------------

    pub fn new_primitive_array<T: PrimitiveElement>(&self, values: &[T]) -> Result<RawRef, VmError> {
        self.allocate_local(ManagedObject::primitive_array(T::into_array(values.to_vec())))
    }

    pub fn get_array_length(&self, raw: RawRef) -> Result<usize, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data(|object| match object.body() {
                ManagedBody::PrimitiveArray(array) => Ok(array.len()),
                ManagedBody::ObjectArray(elements) => Ok(elements.len()),
                _ => Err(object.type_error("array")),
            })
    }

    pub fn get_primitive_array_region<T: PrimitiveElement>(
        &self,
        raw: RawRef,
    ) -> Result<Vec<T>, VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data(|object| match object.body() {
                ManagedBody::PrimitiveArray(array) => T::slice(array)
                    .map(<[T]>::to_vec)
                    .ok_or_else(|| object.type_error(T::CLASS_NAME)),
                _ => Err(object.type_error(T::CLASS_NAME)),
            })
    }

    pub fn set_primitive_array_region<T: PrimitiveElement>(
        &self,
        raw: RawRef,
        start: usize,
        values: &[T],
    ) -> Result<(), VmError> {
        self.resolve_live(raw)?
            .as_ref()
            .with_data_mut(|object| {
                let type_error = object.type_error(T::CLASS_NAME);
                let target = match object.body_mut() {
                    ManagedBody::PrimitiveArray(array) => T::slice_mut(array).ok_or(type_error)?,
                    _ => return Err(type_error),
                };
                let len = target.len();
                let end = start
                    .checked_add(values.len())
                    .filter(|end| *end <= len)
                    .ok_or(VmError::IndexOutOfBounds {
                        index: start.saturating_add(values.len()),
                        len,
                    })?;
                target[start..end].copy_from_slice(values);
                Ok(())
            })
    }

    pub fn new_object_array(&self, element_class: &str, len: usize) -> Result<RawRef, VmError> {
        self.allocate_local(ManagedObject::object_array(element_class, len))
    }

    /// Element `index` as a new local reference, or NULL for an empty slot.
    pub fn get_object_array_element(&self, raw: RawRef, index: usize) -> Result<RawRef, VmError> {
        let element = self
            .resolve_live(raw)?
            .as_ref()
            .with_data(|object| match object.body() {
                ManagedBody::ObjectArray(elements) => elements
                    .get(index)
                    .cloned()
                    .ok_or(VmError::IndexOutOfBounds {
                        index,
                        len: elements.len(),
                    }),
                _ => Err(object.type_error("object array")),
            })?;
        match element.and_then(|weak| weak.upgrade()) {
            Some(arc) => self.add_local(arc),
            None => Ok(RawRef::NULL),
        }
    }

    pub fn set_object_array_element(
        &self,
        raw: RawRef,
        index: usize,
        value: RawRef,
    ) -> Result<(), VmError> {
        let value = self.resolve(value)?.map(|arc| arc.as_weak());
        self.resolve_live(raw)?
            .as_ref()
            .with_data_mut(|object| {
                let type_error = object.type_error("object array");
                match object.body_mut() {
                    ManagedBody::ObjectArray(elements) => {
                        let len = elements.len();
                        let slot = elements
                            .get_mut(index)
                            .ok_or(VmError::IndexOutOfBounds { index, len })?;
                        *slot = value;
                        Ok(())
                    }
                    _ => Err(type_error),
                }
            })
    }
}

#[inline(always)]
fn cell_address(arc: &GCArc<ManagedCell>) -> usize {
    let cell: &ManagedCell = arc.as_ref();
    cell as *const ManagedCell as usize
}

/// Scoped local frame. Dropping the guard releases every local created
/// inside it.
pub struct LocalFrame<'a> {
    env: &'a Env,
    open: bool,
}

impl LocalFrame<'_> {
    /// Closes the frame, keeping `result` alive as a local in the outer
    /// frame.
    pub fn pop(mut self, result: RawRef) -> Result<RawRef, VmError> {
        self.open = false;
        self.env.pop_local_frame(result)
    }
}

impl Drop for LocalFrame<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.env.pop_local_frame(RawRef::NULL) {
                log::error!("Failed to pop local frame: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "env_test.rs"]
mod env_test;
