#![doc = include_str!("../README.md")]

pub mod block;
pub mod dictionary;
pub mod input;
pub mod memory;
pub mod snapshot;
pub mod stack;
pub mod vm;
pub mod word;

#[cfg(any(test, feature = "_force_test_utils"))]
pub mod testutil;

use core::fmt;
use std::io;

pub use crate::vm::{Forth, Params};
use crate::{
    block::BlockError,
    dictionary::{DictError, KindError},
    memory::MemoryError,
    stack::StackError,
};

/// Forth source for the words every other program expects: `;`, `if`,
/// `else`, `then`, `begin`, `until` and friends. The VM never loads it on
/// its own.
pub const PRELUDE: &str = include_str!("../prelude.fth");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Compile,
}

/// Why [`Forth::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// A read found no more input. Running again with new input resumes
    /// where this left off.
    EndOfInput,
    /// The instruction pointer fetched a zero cell. The return stack is
    /// emptied and the next run continues with the outer interpreter.
    NullInstruction,
}

/// Fatal errors. Once one is returned the machine refuses to run again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Stack(StackError),
    Dict(DictError),
    Memory(MemoryError),
    UnknownOpcode { addr: u16, value: u16 },
    /// `:` found no name to define.
    InputExhausted,
    Io(io::ErrorKind),
    /// A previous fatal error left the machine unusable.
    Invalidated,
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::Stack(se)
    }
}

impl From<DictError> for Error {
    fn from(de: DictError) -> Self {
        Error::Dict(de)
    }
}

impl From<MemoryError> for Error {
    fn from(me: MemoryError) -> Self {
        Error::Memory(me)
    }
}

impl From<KindError> for Error {
    fn from(ke: KindError) -> Self {
        match ke {
            KindError::UnknownOpcode { addr, value } => Error::UnknownOpcode { addr, value },
            KindError::Memory(me) => Error::Memory(me),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Stack(StackError::StackEmpty) => f.write_str("stack underflow"),
            Error::Stack(StackError::CapacityExceeded) => f.write_str("stack overflow"),
            Error::Dict(DictError::CapacityExceeded) => f.write_str("dictionary full"),
            Error::Dict(DictError::NameTableFull) => f.write_str("name table full"),
            Error::Dict(DictError::NameTooLong) => f.write_str("name too long"),
            Error::Dict(DictError::EmptyName) => f.write_str("empty name"),
            Error::Dict(DictError::CorruptLink(at)) => {
                write!(f, "corrupt dictionary link to {at}")
            }
            Error::Dict(DictError::BadNameOffset(off)) => {
                write!(f, "bad name offset {off}")
            }
            Error::Dict(DictError::Memory(me)) | Error::Memory(me) => fmt::Display::fmt(me, f),
            Error::UnknownOpcode { addr, value } => {
                write!(f, "unknown opcode {value} at cell {addr}")
            }
            Error::InputExhausted => f.write_str("input ended while reading a name"),
            Error::Io(kind) => write!(f, "i/o error: {kind}"),
            Error::Invalidated => f.write_str("machine invalidated by an earlier error"),
        }
    }
}

impl std::error::Error for Error {}

/// Recoverable conditions. The machine reports them and keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    NotAWordOrNumber(String),
    DivideByZero,
    Block(BlockError),
}

impl From<BlockError> for Diagnostic {
    fn from(be: BlockError) -> Self {
        Diagnostic::Block(be)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NotAWordOrNumber(tok) => write!(f, "{tok}: not a word or number"),
            Diagnostic::DivideByZero => f.write_str("division by zero"),
            Diagnostic::Block(be) => fmt::Display::fmt(be, f),
        }
    }
}
