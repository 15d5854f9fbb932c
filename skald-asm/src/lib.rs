//! Instruction set and assembler for the Skald virtual machine.
//!
//! The crate owns the contract shared between the toolchain and the runtime:
//! the [`Opcode`] enumeration, the fixed-size [`Instruction`] record, the
//! binary [`Program`] layout, and the textual assembler that turns an
//! instruction listing into a linked program.

#![warn(missing_docs)]

mod error;
mod instruction;
mod opcode;
mod program;

pub mod assembler;

pub use error::{AsmError, InvalidOpcode, LoadError};
pub use instruction::{Instruction, Param};
pub use opcode::Opcode;
pub use program::{seek_to_payload, FileMeta, LineMeta, Program, PAYLOAD_MARKER};
