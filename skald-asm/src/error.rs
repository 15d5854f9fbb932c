//! Assembler and loader error types.

use std::io;

use thiserror::Error;

/// A raw opcode word that does not name any [`crate::Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid opcode {0:#06x}")]
pub struct InvalidOpcode(pub u16);

/// Assembly failure, reported with the source line it was detected on.
#[derive(Debug, Error)]
pub enum AsmError {
    /// A statement began with an identifier that names no command.
    #[error("line {line}: {name}, unknown command")]
    UnknownCommand {
        /// Source line of the statement.
        line: usize,
        /// The unrecognized identifier.
        name: String,
    },
    /// No overload of the command accepts the given operand kinds.
    #[error("line {line}: {name}, invalid parameters")]
    InvalidParameters {
        /// Source line of the statement.
        line: usize,
        /// The command name.
        name: String,
    },
    /// A register reference outside `@0`..`@9`.
    #[error("line {line}: invalid register")]
    InvalidRegister {
        /// Source line of the token.
        line: usize,
    },
    /// A `.` variable reference with no identifier behind it.
    #[error("line {line}: invalid variable name")]
    InvalidVariableName {
        /// Source line of the token.
        line: usize,
    },
    /// A character no token can start with.
    #[error("line {line}: unexpected character {found:?}")]
    UnexpectedCharacter {
        /// Source line of the character.
        line: usize,
        /// The offending character.
        found: char,
    },
    /// A `/tag:`-style directive with an unknown or malformed tag.
    #[error("line {line}: {tag}, bad metadata")]
    BadMetadata {
        /// Source line of the directive.
        line: usize,
        /// The tag as written.
        tag: String,
    },
    /// A string literal that never sees its closing quote.
    #[error("line {line}: unterminated string")]
    UnterminatedString {
        /// Source line the literal started on.
        line: usize,
    },
    /// A statement that is neither a command, a label, nor a directive.
    #[error("line {line}: expected command")]
    ExpectedCommand {
        /// Source line of the statement.
        line: usize,
    },
    /// A label referenced somewhere but never defined.
    #[error("missing label {0}")]
    MissingLabel(String),
}

/// Failure while decoding a binary program.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The underlying reader failed.
    #[error("could not read file")]
    Io(#[from] io::Error),
    /// The byte stream ended inside a record.
    #[error("truncated program")]
    UnexpectedEof,
    /// An instruction carried an opcode word outside the known set.
    #[error(transparent)]
    InvalidOpcode(#[from] InvalidOpcode),
    /// A string-table or metadata entry held invalid UTF-8.
    #[error("malformed string data")]
    InvalidString,
    /// A record length field that cannot be honored.
    #[error("malformed length field")]
    InvalidLength,
    /// A structurally invalid program (operand out of range).
    #[error("malformed program: {0}")]
    Malformed(String),
}
