use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Node of an intrusive [`List`]. The node is written at the address the
/// caller hands to [`List::append`], the list never allocates.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly linked list whose nodes live inside memory owned by someone else.
///
/// The allocator uses it to chain the headers of every live page together:
///
/// ```text
///  head                                            tail
/// +-----------+------------+      +-----------+------------+
/// | Node<Page>|  blocks... | <--> | Node<Page>|  blocks... |
/// +-----------+------------+      +-----------+------------+
/// ```
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

/// Iterates over the nodes of a [`List`] from head to tail.
///
/// Yields the node pointers rather than references so callers can remove
/// the node they are looking at, as long as they do it after advancing.
pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a Node<T>>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends a new node to the list.
    ///
    /// It is very important for us that, because we are the actual memory
    /// allocator, this method can not make allocations itself. Therefor,
    /// it has to receive the `addr` where this node has to be written.
    ///
    /// **SAFETY**: Caller must guarantee that `addr` is valid for writes of a
    /// `Node<T>`, suitably aligned, and stays valid until the node is removed.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Unlinks `node` from the list. The memory of the node is left untouched.
    ///
    /// **SAFETY**: `node` must currently be a member of this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<T> Iterator for Iter<'_, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
