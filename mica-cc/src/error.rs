//! Compile-time errors.
//!
//! Every error is fatal: the compiler stops at the first one and the
//! caller reports it with the source file name prefixed. Type mismatches
//! are deliberately not here; they are warnings and only logged.

use crate::Token;

/// A fatal error found while compiling.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Scanner-level problem: malformed literal, overlong name, stray
    /// character.
    #[error("line {line}: {message}")]
    Syntax {
        /// Source line the scanner was on.
        line: u32,
        /// What went wrong.
        message: String,
    },
    /// The parser needed one specific token.
    #[error("line {line}: \"{expected}\" expected but \"{found}\" found")]
    Expected {
        /// Source line of the offending token.
        line: u32,
        /// The token the grammar required.
        expected: &'static str,
        /// The token that was actually read.
        found: Token,
    },
    /// The parser could not start any production here.
    #[error("line {line}: unexpected symbol \"{found}\" found")]
    Unexpected {
        /// Source line of the offending token.
        line: u32,
        /// The token that was read.
        found: Token,
    },
    /// Use of a name with no visible declaration.
    #[error("line {line}: {name} undeclared")]
    Undeclared {
        /// Source line of the use.
        line: u32,
        /// The identifier.
        name: String,
    },
    /// A second body for an already defined procedure.
    #[error("line {line}: multiple definitions of {name}")]
    Redefined {
        /// Source line of the second definition.
        line: u32,
        /// The procedure name.
        name: String,
    },
    /// The expression needed more temporaries than the machine has.
    #[error("line {line}: out of registers")]
    OutOfRegisters {
        /// Source line of the expression.
        line: u32,
    },
    /// The emitted code outgrew the binary buffer.
    #[error("exceeded maximum binary length")]
    BinaryTooLarge,
    /// No definition of `main` was seen.
    #[error("main function missing")]
    MissingMain,
}
