//! Error handling for the machine code backend
//!
//! Nothing in the backend is recoverable user input: by the time a function
//! reaches register allocation it has been validated by earlier phases. Every
//! error here is an internal contract breach between the instruction selector,
//! the allocator and the rewriter, and aborts compilation of the unit.

use crate::register::Register;
use thiserror::Error;

/// Internal compiler faults raised while allocating or rewriting a function
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Virtual register {reg} used in `{function}` has no allocation (instruction: {instruction})")]
    UnmappedVirtualRegister {
        function: String,
        reg: Register,
        instruction: String,
    },

    #[error("No scratch register available for {reg} in `{function}` (instruction: {instruction}, in use: {in_use})")]
    NoScratchRegister {
        function: String,
        reg: Register,
        instruction: String,
        in_use: String,
    },

    #[error("Virtual register {reg} in `{function}` was assigned {assigned}, expected a physical register or stack slot")]
    InvalidAssignment {
        function: String,
        reg: Register,
        assigned: Register,
    },

    #[error("Malformed operand in `{function}`: {message} (instruction: {instruction})")]
    MalformedOperand {
        function: String,
        instruction: String,
        message: String,
    },

    #[error("Unknown register `{name}` for target {target}")]
    UnknownRegister { target: String, name: String },

    #[error("Unknown opcode `{name}` for target {target}")]
    UnknownOpcode { target: String, name: String },

    #[error("Virtual register index {index} does not fit in the virtual register range")]
    VirtualRegisterOutOfRange { index: u32 },

    #[error("Internal compiler error: {message}")]
    Internal { message: String },
}

impl BackendError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        BackendError::Internal {
            message: message.into(),
        }
    }
}

/// Convert from String (for simple error cases)
impl From<String> for BackendError {
    fn from(message: String) -> Self {
        BackendError::Internal { message }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
