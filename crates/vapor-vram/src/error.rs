use thiserror::Error;

use crate::object::ObjectKind;

pub type Result<T> = std::result::Result<T, VramError>;

/// Error taxonomy for cache operations.
///
/// Every variant here is a *non-fatal* input or I/O diagnostic: the operation
/// is abandoned, nothing is mutated, and the caller decides whether to skip
/// the offending unit of work. Programmer-invariant violations (asking for a
/// self-described length on a kind with no header, an internal portion lookup
/// coming up empty) panic instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VramError {
    #[error("range addr={addr:#x} len={len:#x} is outside the {capacity:#x}-byte space")]
    OutOfBounds { addr: u64, len: u64, capacity: u64 },

    #[error("address {addr:#x} is not {align}-byte aligned")]
    Misaligned { addr: u64, align: u64 },

    #[error("zero-length range referenced at {addr:#x}")]
    ZeroLength { addr: u64 },

    #[error("invalid {kind:?} header at {addr:#x}")]
    BadHeader { kind: ObjectKind, addr: u64 },
}
