use crate::il::code::InsnId;
use crate::il::Token;
use crate::util::Offset;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// File does not start with the expected magic bytes
    BadMagic {
        expected: [u8; 4],
        found: [u8; 4],
    },
    UnsupportedVersion(u16),

    /// Input ended in the middle of a structure
    UnexpectedEof,
    InvalidUtf8,

    UnknownOpcode {
        offset: Offset,
        opcode: u16,
    },
    UnknownTypeTag(u8),

    /// Metadata token does not point into the token tables
    BadToken(Token),

    /// Branch lands in the middle of an instruction
    BranchIntoInstruction {
        from: Offset,
        target: Offset,
    },

    /// Branch lands outside of the method code
    BranchOutOfBounds {
        from: Offset,
        target: isize,
    },

    /// Short-form branch displacement no longer fits in a signed byte
    BranchOutOfRange {
        from: Offset,
        displacement: isize,
    },

    CodeTooLarge(Offset),

    /// Branch refers to an instruction that was never placed in this body
    DanglingBranchTarget(InsnId),

    /// Handle does not belong to this body
    UnknownInstruction(InsnId),

    /// Method has a body, but it contains no instructions
    EmptyBody,

    /// More parameters than `ldarg` can address
    TooManyParameters(usize),

    /// Offsets were not recomputed after the body was last mutated
    StaleOffsets,

    /// A referenced module could not be found in any search directory
    UnresolvedReference {
        reference: String,
        searched: Vec<PathBuf>,
    },

    /// Sequence point refers to a method or offset that doesn't exist
    BadSequencePoint {
        type_index: u32,
        method_index: u32,
        offset: Offset,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::IoError(err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::BadMagic { expected, found } => {
                write!(f, "bad magic {:02x?} (expected {:02x?})", found, expected)
            }
            Error::UnsupportedVersion(version) => write!(f, "unsupported version {}", version),
            Error::UnexpectedEof => write!(f, "unexpected end of input"),
            Error::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Error::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode 0x{:x} at IL_{:04x}", opcode, offset.0)
            }
            Error::UnknownTypeTag(tag) => write!(f, "unknown type signature tag 0x{:02x}", tag),
            Error::BadToken(token) => write!(f, "bad metadata token 0x{:08x}", token.0),
            Error::BranchIntoInstruction { from, target } => write!(
                f,
                "branch at IL_{:04x} lands inside the instruction at IL_{:04x}",
                from.0, target.0
            ),
            Error::BranchOutOfBounds { from, target } => write!(
                f,
                "branch at IL_{:04x} targets offset {} outside of the method",
                from.0, target
            ),
            Error::BranchOutOfRange { from, displacement } => write!(
                f,
                "short branch at IL_{:04x} cannot reach displacement {}",
                from.0, displacement
            ),
            Error::CodeTooLarge(size) => write!(f, "method code is too large ({} bytes)", size.0),
            Error::DanglingBranchTarget(id) => {
                write!(f, "branch target {:?} is not part of the body", id)
            }
            Error::UnknownInstruction(id) => write!(f, "{:?} is not part of the body", id),
            Error::EmptyBody => write!(f, "method body has no instructions"),
            Error::TooManyParameters(count) => {
                write!(f, "{} parameters do not fit in the argument slots", count)
            }
            Error::StaleOffsets => write!(f, "instruction offsets were not recomputed"),
            Error::UnresolvedReference {
                reference,
                searched,
            } => write!(
                f,
                "cannot resolve referenced module '{}' (searched {:?})",
                reference, searched
            ),
            Error::BadSequencePoint {
                type_index,
                method_index,
                offset,
            } => write!(
                f,
                "sequence point at IL_{:04x} of method {}/{} has no instruction",
                offset.0, type_index, method_index
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
