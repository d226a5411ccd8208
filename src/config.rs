//! Tunables of the allocator.

/// Payload capacity requested for the first page, before page rounding.
pub const DEFAULT_INITIAL_CAPACITY: usize = 20_000;

/// Extra bytes requested on top of every later page request so that a run
/// of small allocations doesn't map a new page each time.
pub const DEFAULT_GROWTH_SLACK: usize = 80_000;

/// How much memory the allocator asks its [`crate::PageProvider`] for.
///
/// ```rust
/// use tagalloc::Config;
///
/// let config = Config::new()
///     .with_initial_capacity(4096)
///     .with_growth_slack(0);
///
/// assert_eq!(config.initial_capacity, 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Payload bytes the page mapped by [`crate::Allocator::init`] must hold.
    pub initial_capacity: usize,
    /// Bytes added to every page mapped when the free list can't satisfy a request.
    pub growth_slack: usize,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            growth_slack: DEFAULT_GROWTH_SLACK,
        }
    }

    pub const fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    pub const fn with_growth_slack(mut self, growth_slack: usize) -> Self {
        self.growth_slack = growth_slack;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
