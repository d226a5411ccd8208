use tagalloc::Allocator;

fn log_alloc(size: usize, addr: *mut u8) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() -> tagalloc::Result<()> {
    let mut allocator = Allocator::new();
    allocator.init()?;

    let addr1 = allocator.allocate(8)?.as_ptr();
    log_alloc(8, addr1);

    let addr2 = allocator.allocate(100)?.as_ptr();
    log_alloc(100, addr2);

    allocator.release(addr1)?;
    println!("Released {addr1:?}");

    // The newest free block is tried first, so this lands where addr1 was.
    let addr3 = allocator.allocate(16)?.as_ptr();
    log_alloc(16, addr3);

    if addr1 == addr3 {
        println!("Correctly reused at {addr3:?}");
    } else {
        println!("Not reused. addr1 was at {addr1:?} and addr3 is at {addr3:?}");
    }

    allocator.release(addr2)?;
    allocator.release(addr3)?;

    println!("{:#?}", allocator.stats());

    Ok(())
}
