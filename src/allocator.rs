use std::ptr::NonNull;

use log::{trace, warn};

use crate::{
    block::{BlockHandle, BlockState, FREE_NODE_SIZE, MIN_BLOCK_SIZE, OVERHEAD},
    config::Config,
    error::{AllocError, InvariantViolation, Result},
    freelist::FreeList,
    kernel::{Kernel, PageProvider},
    page::{Blocks, Pages, sentinels_intact},
    utils::{ALIGNMENT, checked_align, is_aligned},
};

/// Explicit free list allocator with boundary tags.
///
/// Memory comes from a [`PageProvider`] one page at a time. Inside a page
/// every block carries its `(size, allocated)` word at both ends, so both
/// neighbours of a block can be found in O(1):
///
/// ```text
///                          Free List (newest first)
///            +-----------------------------------------------+
///            |                                               |
/// +--------|-v---------------------------|    +------------|-v-----------------|
/// | Prolog | Free | Block | Block | Free | -> | Prolog | Free | Block | Block  | ...
/// +--------|------------------------|-^--|    +------------------------------- |
///                                   |                      ^
///                                   +----------------------+
/// ```
///
/// Allocation is first-fit over the free list, newest block first, splitting
/// the chosen block when the remainder can stand on its own. Release merges
/// the block with its free neighbours right away and gives the page back to
/// the provider once it holds a single free block again.
///
/// The allocator is not thread safe: all operations take `&mut self`.
pub struct Allocator<P: PageProvider = Kernel> {
    pages: Pages<P>,
    free_list: FreeList,
    config: Config,
    initialized: bool,
}

/// Snapshot of the heap, see [`Allocator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Pages currently mapped.
    pub pages: usize,
    /// Sum of the lengths of every mapped page.
    pub mapped_bytes: usize,
    pub free_blocks: usize,
    /// Size of every free block, header and footer included.
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    /// Size of every allocated block, header and footer included.
    pub allocated_bytes: usize,
}

impl Allocator<Kernel> {
    /// Creates an allocator backed by the operating system. Call
    /// [`Allocator::init`] before using it.
    pub fn new() -> Self {
        Self::with_provider(Kernel::new())
    }
}

impl Default for Allocator<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProvider> Allocator<P> {
    pub fn with_provider(provider: P) -> Self {
        Self::with_config(provider, Config::default())
    }

    pub fn with_config(provider: P, config: Config) -> Self {
        Self {
            pages: Pages::new(provider),
            free_list: FreeList::new(),
            config,
            initialized: false,
        }
    }

    /// Maps the first page. Must be called exactly once, before any other
    /// operation.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(AllocError::AlreadyInitialized);
        }

        self.pages.acquire_initial(self.config.initial_capacity, &mut self.free_list)?;
        self.initialized = true;

        Ok(())
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn provider(&self) -> &P {
        self.pages.provider()
    }

    /// Returns a pointer to at least `size` usable bytes, aligned to
    /// [`crate::ALIGNMENT`]. The memory is not initialized.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if !self.initialized {
            return Err(AllocError::Uninitialized);
        }

        let needed = block_size_for(size).ok_or(AllocError::OutOfMemory { requested: size })?;

        let block = match unsafe { self.free_list.find_first_fit(needed) } {
            Some(block) => block,
            None => {
                trace!("no free block of {needed} bytes, mapping a new page");

                self.pages
                    .acquire_more(needed, self.config.growth_slack, &mut self.free_list)?
            }
        };

        unsafe { self.commit(block, needed) };

        trace!("allocate({size}) -> {:p} ({needed} byte block)", block.payload());

        Ok(block.payload())
    }

    /// Takes `block` out of the free list and marks it allocated, splitting
    /// off the tail as a new free block when it is big enough to be one.
    unsafe fn commit(&mut self, block: BlockHandle, needed: usize) {
        unsafe {
            let size = block.size();
            debug_assert!(size >= needed);

            self.free_list.remove(block);

            let leftover = size - needed;

            block.mark(size, true);

            if leftover > MIN_BLOCK_SIZE {
                block.mark(needed, true);

                let rest = block.next_raw();
                rest.mark(leftover, false);
                self.free_list.insert(rest);

                trace!("split {size} byte block at {:p}, {leftover} bytes stay free", block.payload());
            }
        }
    }

    /// Gives back memory returned by [`Allocator::allocate`].
    ///
    /// Null pointers, pointers outside the heap and pointers whose block is
    /// not allocated (a second release, for instance) are rejected with
    /// [`AllocError::InvalidRelease`] and the heap is left untouched.
    pub fn release(&mut self, ptr: *mut u8) -> Result<()> {
        if !self.initialized {
            return Err(AllocError::Uninitialized);
        }

        let block = self.live_block(ptr).inspect_err(|_| warn!("rejected release of {ptr:p}"))?;

        unsafe {
            block.mark(block.size(), false);

            let block = self.coalesce(block);

            self.pages.reclaim_if_empty(block, &mut self.free_list);
        }

        Ok(())
    }

    /// Merges the freshly freed `block` with its free neighbours and makes
    /// sure the result is on the free list. Returns the merged block.
    unsafe fn coalesce(&mut self, block: BlockHandle) -> BlockHandle {
        unsafe {
            let prev = block.prev().filter(|prev| !prev.is_allocated());
            let next = block.next().filter(|next| !next.is_allocated());
            let size = block.size();

            let merged = match (prev, next) {
                (None, None) => {
                    self.free_list.insert(block);
                    block
                }
                (None, Some(next)) => {
                    self.free_list.remove(next);
                    block.mark(size + next.size(), false);
                    self.free_list.insert(block);
                    block
                }
                // `prev` is already on the free list, it simply grows.
                (Some(prev), None) => {
                    prev.mark(prev.size() + size, false);
                    prev
                }
                (Some(prev), Some(next)) => {
                    self.free_list.remove(next);
                    prev.mark(prev.size() + size + next.size(), false);
                    prev
                }
            };

            trace!(
                "coalesced {:p} into {} byte block at {:p}",
                block.payload(),
                merged.size(),
                merged.payload()
            );

            merged
        }
    }

    /// Resolves `ptr` to the allocated block it designates, without writing anything.
    fn live_block(&self, ptr: *mut u8) -> Result<BlockHandle> {
        let addr = ptr as usize;
        let invalid = AllocError::InvalidRelease { addr };

        let payload = NonNull::new(ptr).ok_or(invalid)?;

        if !is_aligned(addr, ALIGNMENT) {
            return Err(invalid);
        }

        let (_, end) = self.pages.block_area(addr).ok_or(invalid)?;
        let block = BlockHandle::from_payload(payload);

        unsafe {
            let tag = block.tag();

            if !tag.is_allocated() || !tag.is_ordinary() || tag.size() > end - addr {
                return Err(invalid);
            }

            if block.footer_tag() != tag {
                return Err(invalid);
            }
        }

        Ok(block)
    }

    /// Usable bytes behind a pointer returned by [`Allocator::allocate`],
    /// which may be more than what was asked for. Pointers [`Allocator::release`]
    /// would reject are rejected the same way.
    pub fn usable_size(&self, ptr: *mut u8) -> Result<usize> {
        let block = self.live_block(ptr)?;

        Ok(unsafe { block.size() } - OVERHEAD)
    }

    /// Walks every page and sums up its blocks.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            pages: self.pages.len(),
            ..HeapStats::default()
        };

        for (base, len) in self.pages.iter() {
            stats.mapped_bytes += len;

            for block in unsafe { Blocks::new(base) } {
                let tag = unsafe { block.tag() };

                if tag.is_allocated() {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += tag.size();
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += tag.size();
                }
            }
        }

        stats
    }

    /// Verifies the heap invariants: matching boundary tags, no two adjacent
    /// free blocks, intact sentinels, and a free list that holds exactly the
    /// free blocks.
    pub fn check(&self) -> Result<(), InvariantViolation> {
        let mut free = 0;

        for (base, len) in self.pages.iter() {
            let page = base.as_ptr() as usize;
            let mut prev_free = false;
            let mut end = page;

            if !unsafe { sentinels_intact(base, len) } {
                return Err(InvariantViolation::Sentinel { page });
            }

            for block in unsafe { Blocks::new(base) } {
                let addr = block.addr();

                unsafe {
                    let tag = block.tag();

                    if tag.size() % ALIGNMENT != 0 || tag.size() < MIN_BLOCK_SIZE {
                        return Err(InvariantViolation::BadSize { addr, size: tag.size() });
                    }
                    if block.footer_tag() != tag {
                        return Err(InvariantViolation::TagMismatch { addr });
                    }

                    if !tag.is_allocated() {
                        if prev_free {
                            return Err(InvariantViolation::AdjacentFree { addr });
                        }
                        if !self.free_list.iter().any(|member| member == block) {
                            return Err(InvariantViolation::FreeListMembership { addr });
                        }
                        if let BlockState::Free { next: Some(next), .. } = block.state() {
                            if (*next.node()).prev != Some(block) {
                                return Err(InvariantViolation::FreeListMembership { addr });
                            }
                        }
                        free += 1;
                    }

                    prev_free = !tag.is_allocated();
                    end = addr + tag.size();
                }
            }

            // The last block must run right into the Terminator.
            if end != page + len {
                return Err(InvariantViolation::Sentinel { page });
            }
        }

        for member in self.free_list.iter() {
            if unsafe { member.is_allocated() } {
                return Err(InvariantViolation::FreeListMembership { addr: member.addr() });
            }
        }

        if self.free_list.len() != free {
            return Err(InvariantViolation::FreeListLength {
                listed: self.free_list.len(),
                free,
            });
        }

        Ok(())
    }
}

/// Size of the block needed to serve a request of `size` bytes: the payload
/// is at least big enough to hold the free list links once released.
fn block_size_for(size: usize) -> Option<usize> {
    let payload = size.max(FREE_NODE_SIZE);
    let block = checked_align(payload.checked_add(OVERHEAD)?, ALIGNMENT)?;

    Some(block.max(MIN_BLOCK_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        // Small requests still make room for the free list links
        assert_eq!(block_size_for(0), Some(MIN_BLOCK_SIZE));
        assert_eq!(block_size_for(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(block_size_for(FREE_NODE_SIZE), Some(MIN_BLOCK_SIZE));

        for size in [17, 50, 100, 200, 4096] {
            let block = block_size_for(size).unwrap();

            assert_eq!(block % ALIGNMENT, 0);
            assert!(block - OVERHEAD >= size);
            assert!(block - OVERHEAD < size + ALIGNMENT);
        }

        assert_eq!(block_size_for(usize::MAX), None);
    }

    #[test]
    fn operations_need_init() {
        let mut allocator = Allocator::new();

        assert_eq!(allocator.allocate(8), Err(AllocError::Uninitialized));
        assert_eq!(allocator.release(std::ptr::null_mut()), Err(AllocError::Uninitialized));

        allocator.init().unwrap();
        assert_eq!(allocator.init(), Err(AllocError::AlreadyInitialized));
    }

    #[test]
    fn basic_alloc() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        unsafe {
            let block = allocator.allocate(4).unwrap().cast::<u32>();
            block.write(23);
            assert_eq!(23, block.read());

            allocator.release(block.as_ptr().cast()).unwrap();
        }

        allocator.check().unwrap();
    }

    #[test]
    fn space_for_free_block_is_used() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        let first = allocator.allocate(4).unwrap();
        let _second = allocator.allocate(8).unwrap();
        let _third = allocator.allocate(8).unwrap();

        allocator.release(first.as_ptr()).unwrap();

        let fourth = allocator.allocate(4).unwrap();

        assert_eq!(first, fourth);
        allocator.check().unwrap();
    }

    #[test]
    fn split_keeps_remainder_free() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        let before = allocator.stats();
        let ptr = allocator.allocate(100).unwrap();
        let after = allocator.stats();

        assert_eq!(before.free_blocks, 1);
        assert_eq!(after.free_blocks, 1);
        assert_eq!(after.allocated_blocks, 1);
        assert_eq!(after.allocated_bytes, 128);
        assert_eq!(after.free_bytes, before.free_bytes - 128);
        assert_eq!(allocator.usable_size(ptr.as_ptr()), Ok(128 - OVERHEAD));

        allocator.check().unwrap();
    }

    #[test]
    fn small_leftover_is_not_split() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        // Free a 128 byte block between two allocated ones
        let a = allocator.allocate(100).unwrap();
        let _guard = allocator.allocate(100).unwrap();
        allocator.release(a.as_ptr()).unwrap();

        // A 96 byte block leaves exactly MIN_BLOCK_SIZE behind, which stays attached
        let b = allocator.allocate(96 - OVERHEAD).unwrap();

        assert_eq!(a, b);
        assert_eq!(allocator.usable_size(b.as_ptr()), Ok(128 - OVERHEAD));
        allocator.check().unwrap();
    }

    #[test]
    fn double_release_is_rejected() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        let a = allocator.allocate(64).unwrap();
        let _b = allocator.allocate(64).unwrap();

        allocator.release(a.as_ptr()).unwrap();

        let stats = allocator.stats();
        assert_eq!(
            allocator.release(a.as_ptr()),
            Err(AllocError::InvalidRelease { addr: a.as_ptr() as usize })
        );
        assert_eq!(allocator.stats(), stats);
        allocator.check().unwrap();
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let mut allocator = Allocator::new();
        allocator.init().unwrap();

        let mut local = [0u64; 4];
        let a = allocator.allocate(64).unwrap();

        for ptr in [
            std::ptr::null_mut(),
            local.as_mut_ptr().cast::<u8>(),
            unsafe { a.as_ptr().add(1) },
            unsafe { a.as_ptr().add(ALIGNMENT) },
        ] {
            assert_eq!(
                allocator.release(ptr),
                Err(AllocError::InvalidRelease { addr: ptr as usize })
            );
        }

        allocator.release(a.as_ptr()).unwrap();
        allocator.check().unwrap();
    }
}
