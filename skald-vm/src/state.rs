//! Runtime state representation for the VM.

/// Resulting state of a single instruction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteState {
    /// The VM should proceed with the next instruction.
    #[default]
    Proceed,
    /// An `END` instruction was reached.
    Halt,
}

impl ExecuteState {
    /// True when the dispatch loop should keep going.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

