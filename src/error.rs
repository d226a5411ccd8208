//! Error types.

use std::{error, fmt};

pub type Result<T, E = AllocError> = std::result::Result<T, E>;

/// Errors reported by [`crate::Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// An operation other than `init` was called before `init`.
    Uninitialized,
    /// `init` was called twice.
    AlreadyInitialized,
    /// The page provider refused to map a new page, or the request is so
    /// large that its size can't be represented.
    OutOfMemory { requested: usize },
    /// The pointer given to `release` doesn't designate a live allocation.
    /// Heap state is left untouched.
    InvalidRelease { addr: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("allocator used before init"),
            Self::AlreadyInitialized => f.write_str("allocator initialized twice"),
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory while requesting {requested} bytes")
            }
            Self::InvalidRelease { addr } => {
                write!(f, "release of {addr:#x}, which is not a live allocation")
            }
        }
    }
}

impl error::Error for AllocError {}

/// A broken heap invariant found by [`crate::Allocator::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Header and footer of the block at `addr` disagree.
    TagMismatch { addr: usize },
    /// The blocks at `addr` and the one right after it are both free.
    AdjacentFree { addr: usize },
    /// The block at `addr` is free but not on the free list, or the other way around.
    FreeListMembership { addr: usize },
    /// The free list has a different number of members than there are free blocks.
    FreeListLength { listed: usize, free: usize },
    /// A page's sentinels are missing or not allocated.
    Sentinel { page: usize },
    /// A block size is not a multiple of the alignment or too small.
    BadSize { addr: usize, size: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagMismatch { addr } => write!(f, "header and footer differ at {addr:#x}"),
            Self::AdjacentFree { addr } => write!(f, "uncoalesced free blocks at {addr:#x}"),
            Self::FreeListMembership { addr } => {
                write!(f, "free list membership is wrong for {addr:#x}")
            }
            Self::FreeListLength { listed, free } => {
                write!(f, "free list holds {listed} blocks but {free} are free")
            }
            Self::Sentinel { page } => write!(f, "broken sentinel in page {page:#x}"),
            Self::BadSize { addr, size } => write!(f, "block at {addr:#x} has bad size {size}"),
        }
    }
}

impl error::Error for InvariantViolation {}
