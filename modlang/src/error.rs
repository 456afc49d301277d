//! Error types for every pipeline stage, composed into one top-level
//! [`ModlangError`] the CLI matches on to pick an exit code.

use std::fmt;
use thiserror::Error;

/// A source location, attached to nearly every diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// 0-based row (line).
    pub row: u32,
    /// 0-based column.
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row + 1, self.column + 1)
    }
}

/// Lexical errors: malformed input the tokenizer can't turn into tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    /// A byte outside the printable-ASCII-plus-whitespace set.
    #[error("{at}: unexpected byte {byte:#04x}")]
    UnexpectedByte {
        /// Where it occurred.
        at: Location,
        /// The offending byte.
        byte: u8,
    },
    /// Input ended in the middle of what looked like a compound operator.
    #[error("{at}: unterminated operator starting with '{lexeme}'")]
    UnterminatedOperator {
        /// Where it started.
        at: Location,
        /// The partial lexeme read so far.
        lexeme: String,
    },
}

/// Syntactic errors: a well-formed token stream that doesn't form a valid
/// expression or item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A token appeared where the grammar didn't expect it.
    #[error("{at}: unexpected token '{lexeme}'")]
    UnexpectedToken {
        /// Where it occurred.
        at: Location,
        /// Its lexeme.
        lexeme: String,
    },
    /// A closing bracket didn't match the innermost open one (or there was
    /// no open bracket at all).
    #[error("{at}: mismatched closing '{found}', expected '{expected}'")]
    MismatchedBracket {
        /// Where the close occurred.
        at: Location,
        /// What was found.
        found: String,
        /// What the innermost open bracket required.
        expected: String,
    },
    /// Input ended with brackets still open.
    #[error("{at}: unmatched opening '{lexeme}'")]
    UnmatchedOpen {
        /// Where the opening bracket was.
        at: Location,
        /// Its lexeme.
        lexeme: String,
    },
    /// `:` appeared outside of a record literal or parameter list.
    #[error("{at}: ':' is only valid in a record literal or parameter list")]
    ColonOutsideRecord {
        /// Where it occurred.
        at: Location,
    },
    /// Multidimensional indexing (`a[i][j]` folded into one index) isn't supported.
    #[error("{at}: multidimensional indexing is not supported")]
    MultidimensionalIndex {
        /// Where it occurred.
        at: Location,
    },
    /// The left-hand side of `:=` wasn't a plain name (or list of names).
    #[error("{at}: left-hand side of ':=' must be a name")]
    IllegalAssignmentTarget {
        /// Where the offending LHS pattern started.
        at: Location,
    },
    /// `ref` parameters are recognized by the tokenizer but not implemented.
    #[error("{at}: 'ref' parameters are not yet supported")]
    RefNotSupported {
        /// Where the `ref` keyword appeared.
        at: Location,
    },
    /// `=` reassignment is reserved for future use.
    #[error("{at}: '=' reassignment is reserved and not yet supported")]
    ReassignmentNotSupported {
        /// Where the `=` appeared.
        at: Location,
    },
}

/// Semantic errors: well-formed syntax that doesn't type-check or resolve.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A name wasn't found in scope.
    #[error("{at}: undefined name '{name}'")]
    UndefinedName {
        /// Where it was referenced.
        at: Location,
        /// The name.
        name: String,
    },
    /// `a, b := 1, 2, 3;` style arity mismatch.
    #[error("{at}: expected {expected} value(s) on the right-hand side, found {found}")]
    ArityMismatch {
        /// Where the LHS pattern started.
        at: Location,
        /// Names on the LHS.
        expected: usize,
        /// Values produced by the RHS.
        found: usize,
    },
    /// An operand wasn't of a type the operator accepts.
    #[error("{at}: type mismatch: {detail}")]
    TypeMismatch {
        /// Where the offending expression is.
        at: Location,
        /// A human-readable description.
        detail: String,
    },
    /// A record literal field name repeated, or a tuple/record literal mixed
    /// both positional and named elements.
    #[error("{at}: {detail}")]
    InconsistentAggregate {
        /// Where the literal started.
        at: Location,
        /// A human-readable description.
        detail: String,
    },
}

/// Bugs in the compiler itself: states that should be unreachable given a
/// well-formed pattern-command stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// The intermediate-value stack ran out of entries where the pattern
    /// stream guaranteed one.
    #[error("compiler bug: intermediate stack exhausted")]
    IntermediateStackExhausted,
    /// The emplace stack was empty when a command expected an open aggregate frame.
    #[error("compiler bug: no open aggregate literal")]
    NoOpenEmplaceFrame,
    /// A pattern command appeared that the compiler has no handling for in
    /// its current state.
    #[error("compiler bug: unexpected pattern command in this context")]
    UnexpectedPatternCommand,
}

/// Runtime faults raised by the VM while executing bytecode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// An opcode value the VM doesn't recognize.
    #[error("unknown opcode")]
    UnknownOpcode = 0x00,
    /// A read was attempted through a `Ref::NULL`.
    #[error("read of a null reference")]
    NullRead = 0x01,
    /// A write was attempted to a constant or null reference.
    #[error("write to a non-writable reference")]
    WriteToConstant = 0x02,
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivideByZero = 0x03,
    /// `EDIV`/`EMOD` were asked to divide by a non-positive divisor.
    #[error("Euclidean division requires a positive divisor")]
    DivideByNegativeDivisor = 0x04,
    /// An `assert` built-in's argument was zero.
    #[error("assertion failed")]
    AssertionFailed = 0x05,
    /// An array index was out of bounds.
    #[error("array index out of bounds")]
    IndexOutOfBounds = 0x06,
    /// The byte-addressable stack underflowed on a `STACK_FREE`.
    #[error("memory stack underflow")]
    MemoryStackUnderflow = 0x07,
}

/// Top-level error type the CLI matches on to select an exit behavior.
#[derive(Debug, Error)]
pub enum ModlangError {
    /// See [`LexError`].
    #[error(transparent)]
    Lex(#[from] LexError),
    /// See [`ParseError`].
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// See [`CompileError`].
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// See [`InternalError`].
    #[error(transparent)]
    Internal(#[from] InternalError),
    /// A runtime panic, see [`PanicReason`].
    #[error("runtime error: {0}")]
    Runtime(#[from] PanicReason),
    /// I/O failure reading a source file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModlangError {
    /// Process exit code this error should produce.
    pub fn exit_code(&self) -> i32 {
        match self {
            ModlangError::Io(_) => 2,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ModlangError> = std::result::Result<T, E>;
