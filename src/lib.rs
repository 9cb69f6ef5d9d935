//! A binary buddy allocator over one fixed-size arena.
//!
//! The allocator reserves a single contiguous region of [`ARENA_SIZE`]
//! bytes from the platform and serves requests by recursively halving it
//! into power-of-two blocks, never smaller than a granule of
//! [`GRANULE_SIZE`] bytes:
//!
//! ```text
//! +------------------------------ 64K -------------------------------+
//! |                      one free order-16 block                     |
//! +---------------- 32K ---------------+------------- 32K -----------+
//! |      split to serve a request      |         shelved buddy       |
//! +------- 16K ------+------ 16K ------+
//! |    allocated     |  shelved buddy  |
//! +------------------+-----------------+
//! ```
//!
//! Releasing a block walks the other way: as long as the sibling of the
//! released block (its *buddy*, found at `offset XOR size`) is free too,
//! the two merge into the next larger block, so the arena defragments
//! eagerly and a fully released arena is always one maximal block again.
//!
//! All bookkeeping lives outside the managed memory, in a per-granule
//! block index and one free list per size class; the arena bytes are never
//! touched by the allocator itself. See [`BuddyAllocator`] for the API.

mod block;
mod buddy;
mod freelist;
mod kernel;
mod list;

pub use buddy::{BuddyAllocator, find_order, order_size};

use std::fmt;

use thiserror::Error;

/// Granule size exponent: the smallest block is `2^MIN_ORDER` bytes.
pub const MIN_ORDER: u8 = 12;

/// Arena size exponent: the whole arena is one `2^MAX_ORDER` byte block.
pub const MAX_ORDER: u8 = 20;

/// The smallest allocatable unit, in bytes.
pub const GRANULE_SIZE: usize = 1 << MIN_ORDER;

/// Total size of the arena, in bytes.
pub const ARENA_SIZE: usize = 1 << MAX_ORDER;

pub(crate) const GRANULE_COUNT: usize = ARENA_SIZE / GRANULE_SIZE;
pub(crate) const ORDER_COUNT: usize = (MAX_ORDER - MIN_ORDER + 1) as usize;
pub(crate) const KIB: usize = 1 << 10;

const _: () = assert!(MIN_ORDER < MAX_ORDER, "the arena must span more than one granule");
const _: () = assert!((MAX_ORDER as u32) < usize::BITS, "arena size must fit an usize");

/// Any error an allocation request or arena setup can report.
///
/// Allocation failures are side-effect free: the free lists and the block
/// index are untouched when one is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The request exceeds `2^MAX_ORDER` bytes and can never be satisfied
    /// by this arena, regardless of what is currently free.
    #[error("requested {size} bytes, more than the largest block")]
    SizeTooLarge { size: usize },

    /// The request is satisfiable in principle, but no sufficiently large
    /// block is free right now.
    #[error("no free block can hold {size} bytes")]
    OutOfMemory { size: usize },

    /// The platform refused to reserve the arena.
    #[error("the platform could not reserve the arena")]
    ArenaUnavailable,
}

/// Running byte counters for one arena.
///
/// `allocated` counts rounded-up block sizes, not requested sizes; the
/// original request size is not retained anywhere, only its size class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently handed out, in whole blocks.
    pub allocated: usize,
    /// Bytes currently on the free lists.
    pub free: usize,
    /// Size of the arena.
    pub total: usize,
}

impl AllocStats {
    pub(crate) const fn new(total: usize) -> Self {
        Self {
            allocated: 0,
            free: total,
            total,
        }
    }

    pub(crate) fn take(&mut self, bytes: usize) {
        self.allocated += bytes;
        self.free -= bytes;
    }

    pub(crate) fn put(&mut self, bytes: usize) {
        self.allocated -= bytes;
        self.free += bytes;
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocated: {}K free: {}K total: {}K",
            self.allocated / KIB,
            self.free / KIB,
            self.total / KIB
        )
    }
}
