use std::{mem, ptr::NonNull};

use crate::utils::{ALIGNMENT, WORD_SIZE, align};

/// Size of a boundary tag. Header and footer are one word each.
pub(crate) const TAG_SIZE: usize = WORD_SIZE;

/// Bytes every block spends on its header plus its footer.
pub(crate) const OVERHEAD: usize = 2 * TAG_SIZE;

/// Size of the links a free block keeps inside its payload.
pub(crate) const FREE_NODE_SIZE: usize = mem::size_of::<FreeNode>();

/// Smallest block the allocator ever hands out or keeps on the free list:
/// enough payload for a [`FreeNode`] plus header and footer, and never less
/// than two alignment units. On 32-bit targets the links alone would fit in
/// one unit, which is the size of the Prolog.
pub(crate) const MIN_BLOCK_SIZE: usize = {
    let fit = align(FREE_NODE_SIZE + OVERHEAD, ALIGNMENT);

    if fit > 2 * ALIGNMENT { fit } else { 2 * ALIGNMENT }
};

/// Size of the Prolog sentinel. It has no payload, so this is strictly
/// smaller than [`MIN_BLOCK_SIZE`] and a tag of this size can only be a Prolog.
pub(crate) const SENTINEL_SIZE: usize = align(OVERHEAD, ALIGNMENT);

const _: () = assert!(SENTINEL_SIZE < MIN_BLOCK_SIZE);

const ALLOCATED: usize = 0x1;
const FLAGS_MASK: usize = ALIGNMENT - 1;

/// Packed `(size, allocated)` word. Sizes are multiples of [`ALIGNMENT`] so
/// the low bits are free to carry flags, and bit 0 is the allocated flag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Tag(usize);

impl Tag {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & FLAGS_MASK == 0);

        Self(size | if allocated { ALLOCATED } else { 0 })
    }

    #[inline]
    pub const fn terminator() -> Self {
        Self::new(0, true)
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !FLAGS_MASK
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_prolog(self) -> bool {
        self.is_allocated() && self.size() == SENTINEL_SIZE
    }

    #[inline]
    pub const fn is_terminator(self) -> bool {
        self.is_allocated() && self.size() == 0
    }

    /// Ordinary blocks are everything except the two sentinels.
    #[inline]
    pub const fn is_ordinary(self) -> bool {
        self.size() >= MIN_BLOCK_SIZE && self.0 & FLAGS_MASK & !ALLOCATED == 0
    }
}

/// Links stored in the payload of a free block. See [`crate::freelist::FreeList`].
///
/// `prev` points to the block inserted right before this one (older) and
/// `next` to the one inserted right after it (newer).
#[repr(C)]
pub(crate) struct FreeNode {
    pub prev: Option<BlockHandle>,
    pub next: Option<BlockHandle>,
}

/// What the payload of a block currently holds, selected by its allocated flag.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free {
        prev: Option<BlockHandle>,
        next: Option<BlockHandle>,
    },
    Allocated {
        payload_len: usize,
    },
}

/// Opaque reference to a block, represented by its payload address.
///
/// Every block is surrounded by two boundary tags carrying the same
/// `(size, allocated)` word:
///
/// ```text
///            +---------------------+
///            |  size | allocated   | -> Header (one word)
/// payload -> +---------------------+
///            |                     |
///            |  Payload (user data |
///            |  or a FreeNode)     |
///            |                     |
///            +---------------------+
///            |  size | allocated   | -> Footer (one word)
///            +---------------------+
/// ```
///
/// `size` counts header, payload and footer. Because the previous block's
/// footer sits right before our header we can walk backwards in O(1) too.
///
/// Navigation never leaves a page: [`BlockHandle::next`] and
/// [`BlockHandle::prev`] return `None` when the neighbour is the page's
/// Terminator or Prolog sentinel.
///
/// **SAFETY**: every method reading or writing tags requires the handle to
/// point at a block inside a live page laid out by [`crate::page`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockHandle(NonNull<u8>);

impl BlockHandle {
    #[inline]
    pub fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub unsafe fn header(self) -> *mut usize {
        unsafe { self.0.as_ptr().sub(TAG_SIZE).cast() }
    }

    /// The footer position depends on the size currently stored in the header.
    #[inline]
    pub unsafe fn footer(self) -> *mut usize {
        unsafe { self.footer_for(self.tag().size()) }
    }

    #[inline]
    unsafe fn footer_for(self, size: usize) -> *mut usize {
        unsafe { self.0.as_ptr().add(size).sub(OVERHEAD).cast() }
    }

    #[inline]
    pub unsafe fn tag(self) -> Tag {
        unsafe { Tag(self.header().read()) }
    }

    #[inline]
    pub unsafe fn footer_tag(self) -> Tag {
        unsafe { Tag(self.footer().read()) }
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { self.tag().size() }
    }

    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        unsafe { self.tag().is_allocated() }
    }

    /// Writes `(size, allocated)` to the header and then to the footer
    /// located by the new `size`.
    #[inline]
    pub unsafe fn mark(self, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);

        unsafe {
            self.header().write(tag.0);
            self.footer_for(size).write(tag.0);
        }
    }

    /// Only writes the header. Used for the Terminator, which has no footer.
    #[inline]
    pub unsafe fn write_header(self, tag: Tag) {
        unsafe { self.header().write(tag.0) }
    }

    /// The block right after this one, sentinel included.
    #[inline]
    pub unsafe fn next_raw(self) -> BlockHandle {
        unsafe { Self(self.0.add(self.size())) }
    }

    /// The block right before this one, sentinel included. Its size is read
    /// from its footer, the word right before our header.
    #[inline]
    pub unsafe fn prev_raw(self) -> BlockHandle {
        unsafe {
            let prev_size = self.prev_footer_tag().size();

            Self(self.0.sub(prev_size))
        }
    }

    #[inline]
    pub unsafe fn prev_footer_tag(self) -> Tag {
        unsafe { Tag(self.header().sub(1).read()) }
    }

    /// The next block inside the same page, `None` at the Terminator.
    #[inline]
    pub unsafe fn next(self) -> Option<BlockHandle> {
        unsafe {
            let next = self.next_raw();

            (!next.tag().is_terminator()).then_some(next)
        }
    }

    /// The previous block inside the same page, `None` at the Prolog.
    #[inline]
    pub unsafe fn prev(self) -> Option<BlockHandle> {
        unsafe { (!self.prev_footer_tag().is_prolog()).then(|| self.prev_raw()) }
    }

    #[inline]
    pub fn node(self) -> *mut FreeNode {
        self.0.as_ptr().cast()
    }

    pub unsafe fn state(self) -> BlockState {
        unsafe {
            let tag = self.tag();

            if tag.is_allocated() {
                BlockState::Allocated {
                    payload_len: tag.size().saturating_sub(OVERHEAD),
                }
            } else {
                let node = self.node();

                BlockState::Free {
                    prev: (*node).prev,
                    next: (*node).next,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small 16-aligned scratch area used to lay out blocks by hand.
    #[repr(C, align(16))]
    pub(crate) struct Arena(pub [u8; 512]);

    impl Arena {
        pub fn new() -> Self {
            Self([0; 512])
        }

        /// Lays out `Prolog | blocks... | Terminator` and returns the handles
        /// of the ordinary blocks.
        pub fn layout(&mut self, blocks: &[(usize, bool)]) -> Vec<BlockHandle> {
            let base = NonNull::new(self.0.as_mut_ptr()).unwrap();

            unsafe {
                let prolog = BlockHandle::from_payload(base.add(2 * ALIGNMENT));
                prolog.mark(SENTINEL_SIZE, true);

                let mut handles = Vec::new();
                let mut current = prolog.next_raw();

                for &(size, allocated) in blocks {
                    current.mark(size, allocated);
                    handles.push(current);
                    current = current.next_raw();
                }

                current.write_header(Tag::terminator());

                handles
            }
        }
    }

    #[test]
    fn tag_packing() {
        let tag = Tag::new(48, true);
        assert_eq!(tag.size(), 48);
        assert!(tag.is_allocated());
        assert!(tag.is_ordinary());

        let tag = Tag::new(4096, false);
        assert_eq!(tag.size(), 4096);
        assert!(!tag.is_allocated());

        assert!(Tag::terminator().is_terminator());
        assert!(Tag::new(SENTINEL_SIZE, true).is_prolog());
        assert!(!Tag::new(SENTINEL_SIZE, true).is_ordinary());
        assert!(!Tag::new(MIN_BLOCK_SIZE, true).is_prolog());
    }

    #[test]
    fn free_node_fits_in_min_block() {
        assert!(MIN_BLOCK_SIZE - OVERHEAD >= FREE_NODE_SIZE);
        assert!(SENTINEL_SIZE < MIN_BLOCK_SIZE);
        assert_eq!(MIN_BLOCK_SIZE % ALIGNMENT, 0);
    }

    #[test]
    fn header_and_footer_agree_after_mark() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(64, false)]);

        unsafe {
            assert_eq!(blocks[0].tag(), blocks[0].footer_tag());

            blocks[0].mark(64, true);
            assert_eq!(blocks[0].tag(), Tag::new(64, true));
            assert_eq!(blocks[0].tag(), blocks[0].footer_tag());
        }
    }

    #[test]
    fn navigation_stops_at_sentinels() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(32, true), (64, false), (48, true)]);

        unsafe {
            assert_eq!(blocks[0].prev(), None);
            assert_eq!(blocks[0].next(), Some(blocks[1]));
            assert_eq!(blocks[1].prev(), Some(blocks[0]));
            assert_eq!(blocks[1].next(), Some(blocks[2]));
            assert_eq!(blocks[2].prev(), Some(blocks[1]));
            assert_eq!(blocks[2].next(), None);

            assert!(blocks[2].next_raw().tag().is_terminator());
            assert!(blocks[0].prev_raw().tag().is_prolog());
        }
    }

    #[test]
    fn smallest_block_is_not_taken_for_the_prolog() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(MIN_BLOCK_SIZE, true), (64, false)]);

        unsafe {
            assert!(!blocks[0].prev_footer_tag().is_ordinary());
            assert!(!blocks[1].prev_footer_tag().is_prolog());
            assert_eq!(blocks[1].prev(), Some(blocks[0]));
            assert_eq!(blocks[0].next(), Some(blocks[1]));
            assert_eq!(blocks[1].next(), None);
        }
    }

    #[test]
    fn payloads_are_aligned() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(32, true), (80, true), (48, false)]);

        for block in blocks {
            assert_eq!(block.addr() % ALIGNMENT, 0);
        }
    }

    #[test]
    fn state_reads_payload_by_flag() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(64, true), (64, false)]);

        unsafe {
            (*blocks[1].node()).prev = None;
            (*blocks[1].node()).next = None;

            assert_eq!(blocks[0].state(), BlockState::Allocated { payload_len: 64 - OVERHEAD });
            assert_eq!(blocks[1].state(), BlockState::Free { prev: None, next: None });
        }
    }
}
