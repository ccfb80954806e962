use std::fmt::{self, Display};

use peerref_vm::VmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No runtime is installed, or the thread could not be attached.
    Detached,
    Vm(VmError),
    /// A native handle whose payload has been released.
    Expired,
    /// A native handle whose payload is not of the requested type.
    TypeMismatch { expected: &'static str },
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Detached => write!(f, "No runtime environment for this thread"),
            BridgeError::Vm(err) => write!(f, "Runtime Error: {}", err),
            BridgeError::Expired => write!(f, "Referent has expired"),
            BridgeError::TypeMismatch { expected } => {
                write!(f, "Type mismatch: expected {}", expected)
            }
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Vm(err) => Some(err),
            _ => None,
        }
    }
}

impl From<VmError> for BridgeError {
    fn from(err: VmError) -> Self {
        BridgeError::Vm(err)
    }
}
