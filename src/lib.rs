//! # tagalloc
//!
//! Explicit free list memory allocator with boundary tags, built on top of
//! pages obtained from a [`PageProvider`] (`mmap` on unix, `VirtualAlloc` on
//! Windows by default).
//!
//! ```text
//!   tagalloc
//!   ├── utils      - Alignment helpers
//!   ├── block      - Boundary tags and block navigation
//!   ├── freelist   - Explicit free list stored inside free blocks
//!   ├── list       - Intrusive list linking the live pages
//!   ├── page       - Page layout, page acquisition and reclamation
//!   ├── kernel     - PageProvider trait and the OS implementation
//!   └── allocator  - First-fit allocation, splitting and coalescing
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Allocator;
//!
//! let mut allocator = Allocator::new();
//! allocator.init().unwrap();
//!
//! let ptr = allocator.allocate(100).unwrap().cast::<u64>();
//!
//! unsafe {
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//! }
//!
//! allocator.release(ptr.as_ptr().cast()).unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: every operation takes `&mut self` and there is
//!   no synchronization.
//! - Payloads are aligned to [`ALIGNMENT`] bytes and nothing more.
//! - No resizing of live allocations.
//! - Dropping an [`Allocator`] unmaps every page, so pointers it handed out
//!   must not outlive it.

mod allocator;
mod block;
mod config;
mod error;
mod freelist;
mod kernel;
mod list;
mod page;
mod utils;

pub use allocator::{Allocator, HeapStats};
pub use config::{Config, DEFAULT_GROWTH_SLACK, DEFAULT_INITIAL_CAPACITY};
pub use error::{AllocError, InvariantViolation, Result};
pub use kernel::{Kernel, PageProvider};
pub use utils::{ALIGNMENT, align};

/// Bytes every page loses to its header and sentinels.
pub const PAGE_OVERHEAD: usize = page::PAGE_OVERHEAD;

/// Smallest block the allocator hands out, header and footer included.
pub const MIN_BLOCK_SIZE: usize = block::MIN_BLOCK_SIZE;

/// Bytes of every block spent on its header and footer.
pub const BLOCK_OVERHEAD: usize = block::OVERHEAD;
