//! Watches pages come and go as big allocations are made and released.

use tagalloc::{Allocator, Config};

fn main() -> tagalloc::Result<()> {
    let config = Config::new().with_initial_capacity(4096).with_growth_slack(0);
    let mut allocator = Allocator::with_config(tagalloc::Kernel::new(), config);
    allocator.init()?;

    println!("After init: {:?}", allocator.stats());

    let mut blocks = Vec::new();
    for _ in 0..4 {
        blocks.push(allocator.allocate(10_000)?);
        let stats = allocator.stats();
        println!("{} pages, {} bytes mapped", stats.pages, stats.mapped_bytes);
    }

    for block in blocks {
        allocator.release(block.as_ptr())?;
        let stats = allocator.stats();
        println!("{} pages, {} bytes mapped", stats.pages, stats.mapped_bytes);
    }

    Ok(())
}
