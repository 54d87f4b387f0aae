//! Machine Code Backend - Common Types
//!
//! Shared by every backend crate: the register id space and the internal
//! error taxonomy.

pub mod error;
pub mod register;

pub use error::{BackendError, Result};
pub use register::{RegClass, Register, VirtRegCounter};
