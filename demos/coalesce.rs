//! Shows the buddy relation between two minimal allocations and the
//! eager merging on release: freeing both halves, in any order, restores
//! the single top-order block.

use buddyalloc::{BuddyAllocator, GRANULE_SIZE};

fn main() {
    let mut heap = BuddyAllocator::new().expect("could not reserve the arena");

    let first = heap.allocate(GRANULE_SIZE).unwrap();
    let second = heap.allocate(GRANULE_SIZE).unwrap();

    println!("first:  {:p}", first);
    println!("second: {:p}", second);
    println!(
        "addresses differ exactly in the granule bit: {}",
        (first.as_ptr() as usize) ^ (second.as_ptr() as usize) == GRANULE_SIZE
    );

    println!("Both halves live: {}", heap.dump());

    unsafe {
        heap.deallocate(second);
        println!("One half released: {}", heap.dump());

        heap.deallocate(first);
        println!("Both released:     {}", heap.dump());
    }
}
