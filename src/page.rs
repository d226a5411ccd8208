use std::{mem, ptr::NonNull};

use log::debug;

use crate::{
    block::{BlockHandle, MIN_BLOCK_SIZE, SENTINEL_SIZE, TAG_SIZE, Tag},
    error::{AllocError, Result},
    freelist::FreeList,
    kernel::PageProvider,
    list::{List, Node},
    utils::{ALIGNMENT, align, checked_align},
};

/// Metadata every page keeps at its very start, wrapped in a [`Node`] so
/// that all live pages form a [`List`].
pub(crate) struct PageInfo {
    /// Exact length given to [`PageProvider::map`].
    pub len: usize,
}

/// Overhead introduced by the page header in bytes.
pub(crate) const PAGE_HEADER_SIZE: usize = mem::size_of::<Node<PageInfo>>();

/// Offset of the Prolog payload from the page start. The Prolog header takes
/// the word right before it.
const PROLOG_OFFSET: usize = align(PAGE_HEADER_SIZE + TAG_SIZE, ALIGNMENT);

/// Offset of the payload of the first ordinary block.
pub(crate) const FIRST_BLOCK_OFFSET: usize = PROLOG_OFFSET + SENTINEL_SIZE;

/// Bytes of every page the blocks can't use: header, padding, Prolog and
/// the Terminator header (which fits in the space left after the last footer).
pub(crate) const PAGE_OVERHEAD: usize = FIRST_BLOCK_OFFSET;

/// A page freshly mapped from the [`PageProvider`] is laid out as follows:
///
/// ```text
/// base                                                          base + len
/// +----------------+-----+--------+---------------------------+------------+
/// | Node<PageInfo> | pad | Prolog |      one free block       | Terminator |
/// |                |     | (16B)  |  (len - PAGE_OVERHEAD)    | (header)   |
/// +----------------+-----+--------+---------------------------+------------+
/// ```
///
/// Both sentinels are allocated blocks that never go through the free list.
/// The Prolog has a size no ordinary block can have and the Terminator has
/// size 0, so [`BlockHandle::prev`] and [`BlockHandle::next`] know where the
/// page ends without looking at the page header.
///
/// When coalescing turns the page back into a single free block the page is
/// returned to the provider. See [`Pages::reclaim_if_empty`].
pub(crate) struct Pages<P: PageProvider> {
    provider: P,
    registry: List<PageInfo>,
}

impl<P: PageProvider> Pages<P> {
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            registry: List::new(),
        }
    }

    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Maps the first page, big enough for `capacity` bytes of blocks, and
    /// seeds `free_list` with its free block.
    pub fn acquire_initial(&mut self, capacity: usize, free_list: &mut FreeList) -> Result<()> {
        let needed = capacity
            .max(MIN_BLOCK_SIZE)
            .checked_add(PAGE_OVERHEAD)
            .ok_or(AllocError::OutOfMemory { requested: capacity })?;

        self.map_page(needed, free_list).map(|_| ())
    }

    /// Maps a page with room for a block of `block_size` bytes plus `slack`
    /// extra bytes. The new free block is inserted into `free_list` and
    /// returned so the caller can allocate from it right away.
    pub fn acquire_more(
        &mut self,
        block_size: usize,
        slack: usize,
        free_list: &mut FreeList,
    ) -> Result<BlockHandle> {
        let needed = block_size
            .checked_add(PAGE_OVERHEAD)
            .and_then(|needed| needed.checked_add(slack))
            .ok_or(AllocError::OutOfMemory { requested: block_size })?;

        let block = self.map_page(needed, free_list)?;

        debug_assert!(unsafe { block.size() } >= block_size);

        Ok(block)
    }

    fn map_page(&mut self, needed: usize, free_list: &mut FreeList) -> Result<BlockHandle> {
        let page_size = self.provider.page_size();
        debug_assert!(page_size.is_power_of_two() && page_size >= ALIGNMENT);

        let len = checked_align(needed, page_size).ok_or(AllocError::OutOfMemory { requested: needed })?;

        let Some(base) = self.provider.map(len) else {
            return Err(AllocError::OutOfMemory { requested: len });
        };

        debug!("mapped page at {base:p} ({len} bytes, {} pages live)", self.registry.len() + 1);

        unsafe {
            self.registry.append(PageInfo { len }, base);

            let prolog = BlockHandle::from_payload(base.add(PROLOG_OFFSET));
            prolog.mark(SENTINEL_SIZE, true);

            let block = prolog.next_raw();
            block.mark(len - PAGE_OVERHEAD, false);

            block.next_raw().write_header(Tag::terminator());

            free_list.insert(block);

            Ok(block)
        }
    }

    /// Returns the page of `block` to the provider if `block` is the only
    /// block left in it. `block` must be free and a member of `free_list`,
    /// it is removed from it when the page goes away.
    ///
    /// Returns whether the page was unmapped.
    pub unsafe fn reclaim_if_empty(&mut self, block: BlockHandle, free_list: &mut FreeList) -> bool {
        unsafe {
            if block.next().is_some() || block.prev().is_some() {
                return false;
            }

            free_list.remove(block);

            let base = block.payload().sub(FIRST_BLOCK_OFFSET);
            let node = base.cast::<Node<PageInfo>>();
            let len = node.as_ref().data.len;

            debug_assert_eq!(len - PAGE_OVERHEAD, block.size());

            self.registry.remove(node);
            self.provider.unmap(base, len);

            debug!("reclaimed page at {base:p} ({len} bytes, {} pages live)", self.registry.len());
        }

        true
    }

    /// Finds the page whose block area contains `addr` and returns the range
    /// of payload addresses a block in that page can have.
    pub fn block_area(&self, addr: usize) -> Option<(usize, usize)> {
        self.registry.iter().find_map(|node| {
            let base = node.as_ptr() as usize;
            let len = unsafe { node.as_ref().data.len };
            let area = (base + FIRST_BLOCK_OFFSET, base + len);

            (area.0..area.1).contains(&addr).then_some(area)
        })
    }

    /// Iterates over the live pages as `(base, len)`.
    pub fn iter(&self) -> impl Iterator<Item = (NonNull<u8>, usize)> + '_ {
        self.registry
            .iter()
            .map(|node| (node.cast::<u8>(), unsafe { node.as_ref().data.len }))
    }
}

impl<P: PageProvider> Drop for Pages<P> {
    fn drop(&mut self) {
        // The iterator has already moved past a node when it yields it.
        for node in self.registry.iter() {
            unsafe {
                let len = node.as_ref().data.len;
                self.provider.unmap(node.cast(), len);
            }
        }
    }
}

/// Whether the Prolog at the start of the page at `base` and the Terminator
/// in its last word are still in place. Only the tags are read here, the
/// block walk in [`crate::Allocator::check`] makes sure the Terminator it
/// reaches is the one at `base + len`.
///
/// **SAFETY**: `base` and `len` must describe a live page.
pub(crate) unsafe fn sentinels_intact(base: NonNull<u8>, len: usize) -> bool {
    unsafe {
        let prolog = BlockHandle::from_payload(base.add(PROLOG_OFFSET));
        let terminator = BlockHandle::from_payload(base.add(len));

        prolog.tag().is_prolog() && prolog.footer_tag().is_prolog() && terminator.tag().is_terminator()
    }
}

/// Walks the ordinary blocks of one page, from the Prolog to the Terminator.
pub(crate) struct Blocks {
    current: Option<BlockHandle>,
}

impl Blocks {
    /// **SAFETY**: `base` must be the start of a live page.
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        let first = unsafe { BlockHandle::from_payload(base.add(FIRST_BLOCK_OFFSET)) };

        Self { current: Some(first) }
    }
}

impl Iterator for Blocks {
    type Item = BlockHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        self.current = unsafe { block.next() };

        Some(block)
    }
}
