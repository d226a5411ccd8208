//! This file contains the helper functions for the allocator. These are the
//! functions that don't particularly belong to any concrete layer of the heap.

/// Every block size (and therefore every payload address) is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Size of a machine word. Boundary tags are exactly one word wide.
pub(crate) const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// It aligns `to_be_aligned` up to the next multiple of `alignment`.
///
/// This is used both to round block sizes to [`ALIGNMENT`] and to round
/// page requests to [`crate::PageProvider::page_size`]. `alignment` must be
/// a power of two.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is close to `usize::MAX`.
#[inline]
pub(crate) fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());

    Some(to_be_aligned.checked_add(alignment - 1)? & !(alignment - 1))
}

#[inline]
pub(crate) fn is_aligned(addr: usize, alignment: usize) -> bool {
    addr & (alignment - 1) == 0
}
