//! Bridged demo classes.
//!
//! Each type here is the native half of a managed class; `NativeObject`
//! ties the two together.
mod client;
mod long;
mod string;
mod string_generator;
mod vector;

pub use client::StringGeneratorClient;
pub use long::JLong;
pub use string::JString;
pub use string_generator::StringGenerator;
pub use vector::JVector;
