use buddyalloc::BuddyAllocator;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut heap = BuddyAllocator::new().expect("could not reserve the arena");

    println!("Fresh arena: {}", heap.dump());

    let a = heap.allocate(4096).unwrap();
    log_alloc(a.as_ptr(), 4096);

    let b = heap.allocate(5000).unwrap();
    log_alloc(b.as_ptr(), 5000);

    let c = heap.allocate(70_000).unwrap();
    log_alloc(c.as_ptr(), 70_000);

    println!("After three allocations: {}", heap.dump());
    println!("Stats: {}", heap.stats());

    unsafe {
        heap.deallocate(a);
        heap.deallocate(b);
        heap.deallocate(c);
    }

    println!("Everything released: {}", heap.dump());
}
