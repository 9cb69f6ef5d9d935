use std::ptr::NonNull;

use log::{debug, trace};

use crate::{
    ARENA_SIZE, AllocError, AllocStats, GRANULE_COUNT, GRANULE_SIZE, KIB, MAX_ORDER, MIN_ORDER,
    block::{self, Block},
    freelist::FreeTable,
    kernel::Arena,
};

/// Size in bytes of a block of the given order.
#[inline]
pub fn order_size(order: u8) -> usize {
    1 << order
}

/// Smallest order in `MIN_ORDER..=MAX_ORDER` whose block size holds `size`
/// bytes, or `None` when the request exceeds the largest block the arena
/// can ever produce. `None` means "no fit", which is distinct from running
/// out of free blocks at allocation time.
pub fn find_order(size: usize) -> Option<u8> {
    if size > ARENA_SIZE {
        return None;
    }

    let rounded = size.next_power_of_two();
    Some((rounded.trailing_zeros() as u8).max(MIN_ORDER))
}

/// A fixed-arena binary buddy allocator.
///
/// One instance owns one arena plus all of its bookkeeping, so independent
/// arenas can coexist and each is torn down when its allocator drops. The
/// methods take `&mut self`: the single-logical-caller model is enforced by
/// the borrow checker instead of a lock.
pub struct BuddyAllocator {
    arena: Arena,
    blocks: Box<[Block]>,
    free_lists: FreeTable,
    stats: AllocStats,
}

impl BuddyAllocator {
    /// Reserves the arena and sets it up as a single free block of order
    /// [`MAX_ORDER`](crate::MAX_ORDER).
    pub fn new() -> Result<Self, AllocError> {
        let arena = Arena::reserve().ok_or(AllocError::ArenaUnavailable)?;

        let mut blocks: Box<[Block]> = (0..GRANULE_COUNT).map(|_| Block::new()).collect();
        let mut free_lists = FreeTable::new();

        blocks[0].order = Some(MAX_ORDER);
        free_lists.insert_free_block(&mut blocks, MAX_ORDER, 0);

        Ok(Self {
            arena,
            blocks,
            free_lists,
            stats: AllocStats::new(ARENA_SIZE),
        })
    }

    /// Allocates a block of at least `size` bytes and returns its address.
    ///
    /// The request is rounded up to the smallest sufficient power of two,
    /// and the smallest free block that satisfies it wins; a larger block
    /// is split only when every list at or below its order is empty. On
    /// failure no allocator state has changed.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let req_order = find_order(size).ok_or(AllocError::SizeTooLarge { size })?;

        for scan in req_order..=MAX_ORDER {
            let Some(idx) = self.free_lists.take_first_free(&mut self.blocks, scan) else {
                continue;
            };
            let offset = block::granule_to_offset(idx);

            // Halve until the block matches the request, shelving each
            // upper half on the list one order below. The lower half stays
            // the candidate, so the returned address never moves.
            let mut order = scan;
            while order > req_order {
                order -= 1;

                let buddy = block::buddy_offset(offset, order);
                let buddy_idx = block::offset_to_granule(buddy);
                self.blocks[buddy_idx].order = Some(order);
                self.free_lists
                    .insert_free_block(&mut self.blocks, order, buddy_idx);

                trace!("split: shelved order {order} buddy at {buddy:#x}");
            }

            self.blocks[idx].order = Some(req_order);
            self.stats.take(order_size(req_order));
            debug!("allocated order {req_order} block at {offset:#x} ({size} bytes requested)");

            return Ok(self.arena.offset_to_ptr(offset));
        }

        debug!("out of memory: no free block of order {req_order} or above");
        Err(AllocError::OutOfMemory { size })
    }

    /// Releases the block at `ptr`, eagerly merging it with its buddy as
    /// long as the buddy is free, one order at a time.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on
    /// this allocator and not have been released since. No validation is
    /// performed beyond `debug_assert!`s; an invalid or repeated release
    /// silently corrupts the bookkeeping, exactly like handing a foreign
    /// pointer to any other allocator.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let mut offset = self.arena.ptr_to_offset(ptr);
        debug_assert_eq!(offset % GRANULE_SIZE, 0, "pointer is not granule aligned");

        let idx = block::offset_to_granule(offset);
        debug_assert!(!self.blocks[idx].free, "double free of {offset:#x}");

        let mut order = self.blocks[idx]
            .order
            .expect("pointer does not head a live block");
        self.stats.put(order_size(order));

        // The head may move downwards while merging; whichever granule
        // ends up heading the merged block gets its order written back
        // below.
        self.blocks[idx].order = None;

        while order < MAX_ORDER {
            let buddy = block::buddy_offset(offset, order);
            let buddy_idx = block::offset_to_granule(buddy);

            let mergeable =
                self.blocks[buddy_idx].free && self.blocks[buddy_idx].order == Some(order);
            if !mergeable {
                break;
            }

            self.free_lists
                .remove_free_block(&mut self.blocks, order, buddy_idx);
            self.blocks[buddy_idx].order = None;

            trace!("coalesce: absorbed order {order} buddy at {buddy:#x}");

            // The merged block is anchored at its lower half, which keeps
            // it aligned to its new size.
            offset = offset.min(buddy);
            order += 1;
        }

        let head = block::offset_to_granule(offset);
        self.blocks[head].order = Some(order);
        self.free_lists
            .insert_free_block(&mut self.blocks, order, head);

        debug!("released block, now free at order {order}, offset {offset:#x}");
    }

    /// One-line report of the free-list table: a `count:size` field per
    /// order from smallest to largest, e.g. `"0:4K ... 1:1024K \n"` for a
    /// fresh arena. Read-only.
    pub fn dump(&self) -> String {
        let mut out = String::new();

        for order in MIN_ORDER..=MAX_ORDER {
            let count = self.free_lists.free_count(&self.blocks, order);
            out.push_str(&format!("{count}:{}K ", order_size(order) / KIB));
        }
        out.push('\n');

        out
    }

    /// Running byte counters for this arena.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }
}
