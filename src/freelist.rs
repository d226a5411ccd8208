use crate::block::BlockHandle;

/// Explicit list of free blocks.
///
/// The list doesn't own any memory. Its links live in the payload of the free
/// blocks themselves (see [`crate::block::FreeNode`]), since the payload of a
/// free block is not used by anybody else:
///
/// ```text
/// +------------------------+
/// |     Header (tag)       |
/// +------------------------+ <--- BlockHandle
/// |  prev (older block)    |
/// |  next (newer block)    |
/// +------------------------+
/// |    Unused payload      |
/// |          ...           |
/// +------------------------+
/// |     Footer (tag)       |
/// +------------------------+
/// ```
///
/// We only keep a pointer to the most recently inserted block. Following
/// `prev` from there walks the blocks from newest to oldest, which is also the
/// order used by the first-fit search.
///
/// ```text
///               prev             prev
///   oldest  <---------  ...  <---------  newest <--- FreeList::tail
///           --------->       --------->
///               next             next
/// ```
pub(crate) struct FreeList {
    tail: Option<BlockHandle>,
    len: usize,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { tail: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends `block` as the newest member.
    ///
    /// **SAFETY**: `block` must be free, have room for a
    /// [`crate::block::FreeNode`] and must not be a member already.
    pub unsafe fn insert(&mut self, block: BlockHandle) {
        unsafe {
            debug_assert!(!block.is_allocated());

            if let Some(tail) = self.tail {
                (*tail.node()).next = Some(block);
            }

            let node = block.node();
            (*node).prev = self.tail;
            (*node).next = None;
        }

        self.tail = Some(block);
        self.len += 1;
    }

    /// Detaches `block` from the list in O(1) using its own links.
    ///
    /// **SAFETY**: `block` must currently be a member of this list.
    pub unsafe fn remove(&mut self, block: BlockHandle) {
        unsafe {
            let node = block.node();
            let prev = (*node).prev;
            let next = (*node).next;

            match (prev, next) {
                // Only member
                (None, None) => self.tail = None,
                // Oldest member
                (None, Some(next)) => (*next.node()).prev = None,
                // Newest member
                (Some(prev), None) => {
                    (*prev.node()).next = None;
                    self.tail = Some(prev);
                }
                // Interior member
                (Some(prev), Some(next)) => {
                    (*prev.node()).next = Some(next);
                    (*next.node()).prev = Some(prev);
                }
            }
        }

        self.len -= 1;
    }

    /// Iterates from the newest member to the oldest one.
    pub fn iter(&self) -> Iter {
        Iter {
            current: self.tail,
        }
    }

    /// First-fit search: returns the newest block whose size is at least
    /// `size` bytes, header and footer included.
    pub unsafe fn find_first_fit(&self, size: usize) -> Option<BlockHandle> {
        self.iter().find(|block| unsafe { block.size() >= size })
    }
}

pub(crate) struct Iter {
    current: Option<BlockHandle>,
}

impl Iterator for Iter {
    type Item = BlockHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        self.current = unsafe { (*block.node()).prev };

        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::Arena;

    fn members(list: &FreeList) -> Vec<BlockHandle> {
        list.iter().collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list = FreeList::new();

        assert_eq!(list.len(), 0);
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn iterates_newest_first() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(32, false), (48, true), (64, false), (48, true), (32, false)]);
        let mut list = FreeList::new();

        unsafe {
            list.insert(blocks[0]);
            list.insert(blocks[2]);
            list.insert(blocks[4]);
        }

        assert_eq!(list.len(), 3);
        assert_eq!(members(&list), vec![blocks[4], blocks[2], blocks[0]]);
    }

    #[test]
    fn remove_every_position() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(32, false), (32, false), (32, false), (32, false)]);
        let mut list = FreeList::new();

        unsafe {
            for block in &blocks {
                list.insert(*block);
            }

            // Interior
            list.remove(blocks[1]);
            assert_eq!(members(&list), vec![blocks[3], blocks[2], blocks[0]]);

            // Oldest
            list.remove(blocks[0]);
            assert_eq!(members(&list), vec![blocks[3], blocks[2]]);

            // Newest
            list.remove(blocks[3]);
            assert_eq!(members(&list), vec![blocks[2]]);

            // Only member
            list.remove(blocks[2]);
        }

        assert_eq!(list.len(), 0);
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn first_fit_prefers_newest() {
        let mut arena = Arena::new();
        let blocks = arena.layout(&[(128, false), (48, true), (96, false), (48, true), (32, false)]);
        let mut list = FreeList::new();

        unsafe {
            list.insert(blocks[0]);
            list.insert(blocks[2]);
            list.insert(blocks[4]);

            assert_eq!(list.find_first_fit(32), Some(blocks[4]));
            assert_eq!(list.find_first_fit(64), Some(blocks[2]));
            assert_eq!(list.find_first_fit(112), Some(blocks[0]));
            assert_eq!(list.find_first_fit(144), None);
        }
    }
}
