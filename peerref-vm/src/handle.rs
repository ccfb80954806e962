//! Raw handle values and the generational slot tables behind them.
//!
//! A handle is an opaque 64-bit value. The two low bits carry its kind:
//!
//! | bits | kind                                   |
//! |------|----------------------------------------|
//! | `00` | native record pointer (or NULL)        |
//! | `01` | managed local reference                |
//! | `10` | managed global reference               |
//! | `11` | managed weak global reference          |
//!
//! Managed handles pack a slot index and the slot's generation above the
//! kind bits, so a value released twice or used after its slot was reused
//! resolves to nothing instead of aliasing another object.

use std::fmt::{self, Debug};

const KIND_BITS: u32 = 2;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;
const INDEX_BITS: u32 = 32;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_SHIFT: u32 = KIND_BITS + INDEX_BITS;
const GENERATION_MASK: u32 = (1 << (u64::BITS - GENERATION_SHIFT)) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Native,
    Local,
    Global,
    WeakGlobal,
}

impl RefKind {
    #[inline(always)]
    fn of(bits: u64) -> Self {
        match bits & KIND_MASK {
            0 => RefKind::Native,
            1 => RefKind::Local,
            2 => RefKind::Global,
            _ => RefKind::WeakGlobal,
        }
    }

    #[inline(always)]
    fn tag(self) -> u64 {
        match self {
            RefKind::Native => 0,
            RefKind::Local => 1,
            RefKind::Global => 2,
            RefKind::WeakGlobal => 3,
        }
    }
}

/// Position of a value in a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

impl SlotId {
    fn encode(self, kind: RefKind) -> u64 {
        ((self.generation as u64) << GENERATION_SHIFT)
            | ((self.index as u64) << KIND_BITS)
            | kind.tag()
    }

    fn decode(bits: u64) -> Self {
        SlotId {
            index: ((bits >> KIND_BITS) & INDEX_MASK) as u32,
            generation: (bits >> GENERATION_SHIFT) as u32,
        }
    }
}

/// A scoped or pinned handle value. NULL means "no object".
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawRef(u64);

/// An expirable handle value. NULL means "no object".
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawWeak(u64);

macro_rules! raw_handle_common {
    ($name:ident) => {
        impl $name {
            pub const NULL: $name = $name(0);

            #[inline(always)]
            pub const fn from_bits(bits: u64) -> Self {
                $name(bits)
            }

            #[inline(always)]
            pub const fn bits(self) -> u64 {
                self.0
            }

            #[inline(always)]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            #[inline(always)]
            pub fn kind(self) -> RefKind {
                RefKind::of(self.0)
            }

            /// Slot behind a managed handle of the given kind.
            pub fn slot(self, kind: RefKind) -> Option<SlotId> {
                if self.is_null() || self.kind() != kind || kind == RefKind::Native {
                    return None;
                }
                Some(SlotId::decode(self.0))
            }

            /// Handle value for a record living at `ptr`.
            pub fn from_native_ptr<T>(ptr: *const T) -> Self {
                let address = ptr as usize as u64;
                debug_assert_eq!(address & KIND_MASK, 0, "native records must be 4-byte aligned");
                $name(address)
            }

            /// Record pointer carried by a native handle.
            pub fn native_ptr<T>(self) -> Option<*const T> {
                if self.is_null() || self.kind() != RefKind::Native {
                    return None;
                }
                Some(self.0 as usize as *const T)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_null() {
                    return write!(f, "{}(NULL)", stringify!($name));
                }
                match self.kind() {
                    RefKind::Native => write!(f, "{}(native {:#x})", stringify!($name), self.0),
                    kind => {
                        let slot = SlotId::decode(self.0);
                        write!(
                            f,
                            "{}({:?} #{}@{})",
                            stringify!($name),
                            kind,
                            slot.index,
                            slot.generation
                        )
                    }
                }
            }
        }
    };
}

raw_handle_common!(RawRef);
raw_handle_common!(RawWeak);

impl RawRef {
    pub(crate) fn managed(kind: RefKind, slot: SlotId) -> Self {
        debug_assert!(matches!(kind, RefKind::Local | RefKind::Global));
        RawRef(slot.encode(kind))
    }
}

impl RawWeak {
    pub(crate) fn managed(slot: SlotId) -> Self {
        RawWeak(slot.encode(RefKind::WeakGlobal))
    }
}

/// Weak values are accepted wherever a handle is promoted, as in
/// `NewLocalRef(weak)`.
impl From<RawWeak> for RawRef {
    fn from(weak: RawWeak) -> Self {
        RawRef(weak.0)
    }
}

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

/// Generational slab of handle targets.
pub struct HandleTable<V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    live: usize,
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        HandleTable {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: V) -> SlotId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return SlotId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SlotId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: SlotId) -> Option<&V> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Empties the slot and bumps its generation. Stale ids return `None`.
    pub fn remove(&mut self, id: SlotId) -> Option<V> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    /// Removes every value, returning them so the caller can drop them
    /// outside of any lock.
    pub fn drain(&mut self) -> Vec<V> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
                self.free.push(index as u32);
                drained.push(value);
            }
        }
        self.live = 0;
        drained
    }
}
