//! Page provider for tests, backed by the global allocator.

#![allow(dead_code)]

use std::{
    alloc::{self, Layout},
    cell::RefCell,
    ptr::NonNull,
    rc::Rc,
};

use tagalloc::PageProvider;

/// Everything the mock saw, shared with the test that created it.
#[derive(Debug, Default)]
pub struct Ledger {
    /// Live mappings as `(addr, len)`.
    pub live: Vec<(usize, usize)>,
    pub maps: Vec<(usize, usize)>,
    pub unmaps: Vec<(usize, usize)>,
    /// Number of further `map` calls that succeed. `None` means no limit.
    pub maps_left: Option<usize>,
}

impl Ledger {
    pub fn live_bytes(&self) -> usize {
        self.live.iter().map(|&(_, len)| len).sum()
    }
}

pub struct MockPages {
    page_size: usize,
    ledger: Rc<RefCell<Ledger>>,
}

impl MockPages {
    pub fn new(page_size: usize) -> (Self, Rc<RefCell<Ledger>>) {
        let ledger = Rc::new(RefCell::new(Ledger::default()));

        (
            Self {
                page_size,
                ledger: Rc::clone(&ledger),
            },
            ledger,
        )
    }
}

unsafe impl PageProvider for MockPages {
    fn map(&mut self, len: usize) -> Option<NonNull<u8>> {
        assert_eq!(len % self.page_size, 0, "unaligned map request of {len} bytes");

        let mut ledger = self.ledger.borrow_mut();

        match ledger.maps_left {
            Some(0) => return None,
            Some(ref mut left) => *left -= 1,
            None => {}
        }

        let layout = Layout::from_size_align(len, self.page_size).ok()?;
        let addr = NonNull::new(unsafe { alloc::alloc(layout) })?;

        ledger.live.push((addr.as_ptr() as usize, len));
        ledger.maps.push((addr.as_ptr() as usize, len));

        Some(addr)
    }

    unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) {
        let mapping = (addr.as_ptr() as usize, len);
        let mut ledger = self.ledger.borrow_mut();

        let position = ledger
            .live
            .iter()
            .position(|&live| live == mapping)
            .expect("unmap does not match a live mapping");
        ledger.live.remove(position);
        ledger.unmaps.push(mapping);

        unsafe { alloc::dealloc(addr.as_ptr(), Layout::from_size_align_unchecked(len, self.page_size)) }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Tiny deterministic generator so the stress tests are reproducible.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
