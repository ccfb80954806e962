use std::fmt::{self, Display};

use crate::handle::{RawRef, RefKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The calling thread has no attachment to this runtime.
    NotAttached,
    /// Attaching would exceed `RuntimeConfig::max_attached_threads`.
    AttachLimit(usize),
    /// The handle does not name a live slot.
    InvalidHandle(RawRef),
    WrongHandleKind { expected: RefKind, found: RefKind },
    TypeMismatch { expected: String, found: String },
    NoSuchField(String),
    IndexOutOfBounds { index: usize, len: usize },
    /// `pop_local_frame` with only the base frame left.
    FrameUnderflow,
    BorrowError(String),
}

impl Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::NotAttached => write!(f, "Thread is not attached to the runtime"),
            VmError::AttachLimit(limit) => {
                write!(f, "Attach limit reached: at most {} threads", limit)
            }
            VmError::InvalidHandle(raw) => write!(f, "Invalid handle: {:?}", raw),
            VmError::WrongHandleKind { expected, found } => {
                write!(f, "Wrong handle kind: expected {:?}, found {:?}", expected, found)
            }
            VmError::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            VmError::NoSuchField(name) => write!(f, "No such field: {}", name),
            VmError::IndexOutOfBounds { index, len } => {
                write!(f, "Index {} out of bounds for length {}", index, len)
            }
            VmError::FrameUnderflow => write!(f, "No local frame to pop"),
            VmError::BorrowError(msg) => write!(f, "Borrow Error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}
