//! Runtime error types.

use thiserror::Error;

/// Fault raised while executing an instruction.
///
/// A `Runtime` fault unwinds to the dispatch loop, which decorates the
/// message with a file/line trace and performs graceful cleanup. An
/// `OutOfMemory` fault is the allocator's non-local exit: the loop returns
/// immediately without touching possibly inconsistent VM state.
#[derive(Debug, Error)]
#[must_use]
pub enum RuntimeFault {
    /// A recoverable runtime error with a plain message.
    #[error("{0}")]
    Runtime(String),
    /// Allocator exhaustion that survived collection and bucket growth.
    #[error("Out of memory in {0}")]
    OutOfMemory(&'static str),
}

impl RuntimeFault {
    /// Builds a runtime fault from anything message-like.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

/// Top-level error returned by [`crate::Vm::run`].
#[derive(Debug, Error)]
pub enum VmError {
    /// A runtime error, already formatted with its file/line trace.
    #[error("{0}")]
    Runtime(String),
    /// Fatal allocator exhaustion; the VM state was abandoned as-is.
    #[error("Out of memory in {0}")]
    OutOfMemory(&'static str),
    /// The program image could not be decoded.
    #[error(transparent)]
    Load(#[from] skald_asm::LoadError),
}
