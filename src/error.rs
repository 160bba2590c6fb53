//! Error types shared by the bytecode model and the matching engine.

use thiserror::Error;

use crate::model::{EntityKind, Side};

/// Faults raised while decoding a class file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid classfile magic: 0x{0:08x}")]
    InvalidMagic(u32),

    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),

    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),

    #[error("constant pool type mismatch at index {index}: expected {expected}, found {found}")]
    ConstantPoolTypeMismatch {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid modified UTF-8 constant")]
    InvalidModifiedUtf8,

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("malformed {0} attribute")]
    MalformedAttribute(&'static str),

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u32 },

    #[error("trailing bytes after {0}")]
    TrailingBytes(&'static str),
}

/// Faults raised by the match graph mutation API and by auto-match passes.
///
/// The invalid-argument variants are caller errors: they are raised before
/// any graph mutation happens and are never retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("array dimension mismatch: {a} vs {b}")]
    ArrayDimensionMismatch { a: u8, b: u8 },

    #[error("{kind:?} owners are not matched to each other: {a} / {b}")]
    OwnerNotMatched {
        kind: EntityKind,
        a: String,
        b: String,
    },

    #[error("variable kind mismatch: {a} is {} but {b} is {}", arg_kind(.a_is_arg), arg_kind(.b_is_arg))]
    VarKindMismatch {
        a: String,
        b: String,
        a_is_arg: bool,
        b_is_arg: bool,
    },

    #[error("{kind:?} {id} on side {side:?} is pinned unmatchable")]
    NotMatchable {
        kind: EntityKind,
        side: Side,
        id: String,
    },

    #[error("{kind:?} {id} on side {side:?} is matched and cannot be pinned unmatchable")]
    AlreadyMatched {
        kind: EntityKind,
        side: Side,
        id: String,
    },

    #[error("auto-match pass cancelled")]
    Cancelled,

    #[error("classifier {classifier} produced invalid score {score}")]
    InvalidScore {
        classifier: &'static str,
        score: f64,
    },
}

/// Malformed persisted match file. Line numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchesFormatError {
    #[error("line {line}: missing 'Matches saved' header")]
    MissingHeader { line: usize },

    #[error("line {line}: malformed line: {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("line {line}: unknown header section {name:?}")]
    UnknownSection { line: usize, name: String },

    #[error("line {line}: invalid side {side:?}")]
    InvalidSide { line: usize, side: String },

    #[error("line {line}: invalid number {value:?}")]
    InvalidNumber { line: usize, value: String },

    #[error("line {line}: invalid name pattern {pattern:?}")]
    InvalidPattern { line: usize, pattern: String },

    #[error("line {line}: member entry outside of a class block")]
    MemberOutsideClass { line: usize },

    #[error("line {line}: variable entry outside of a method block")]
    VarOutsideMethod { line: usize },
}

fn arg_kind(is_arg: &bool) -> &'static str {
    if *is_arg { "an argument" } else { "a local variable" }
}

pub type MatchResult<T> = std::result::Result<T, MatchError>;
