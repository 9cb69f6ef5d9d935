use std::ptr::NonNull;

use log::debug;

use crate::ARENA_SIZE;

/// The arena: one contiguous `ARENA_SIZE` byte region reserved from the
/// platform when the allocator is created and handed back when it is
/// dropped. The allocator never grows, shrinks or remaps it, and never
/// reads or writes through it; all bookkeeping lives in the block index.
pub(crate) struct Arena {
    base: NonNull<u8>,
}

/// Abstraction over the platform pages-from-the-OS primitive, so the arena
/// code has nothing to do with the concrete API offered by each kernel.
trait PlatformMemory {
    /// Requests a memory region of size `len`, or `None` if the underlying
    /// call fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the region of size `len` starting at `addr` to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);
}

/// Unit type the per-platform [`PlatformMemory`] impls hang off.
struct Kernel;

impl Arena {
    /// Reserves the arena. Called exactly once per allocator instance.
    pub fn reserve() -> Option<Self> {
        // SAFETY: a fresh anonymous mapping is requested, nothing else can
        // hold a reference into it yet.
        let base = unsafe { Kernel::request_memory(ARENA_SIZE)? };
        debug!("reserved {ARENA_SIZE} byte arena at {:p}", base);

        Some(Self { base })
    }

    /// Address of the byte `offset` bytes past the arena base.
    #[inline]
    pub fn offset_to_ptr(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < ARENA_SIZE);

        // SAFETY: `offset` stays within the one reserved mapping.
        unsafe { self.base.add(offset) }
    }

    /// Byte offset of `ptr` from the arena base. The caller must pass a
    /// pointer into the arena.
    #[inline]
    pub fn ptr_to_offset(&self, ptr: NonNull<u8>) -> usize {
        ptr.addr().get() - self.base.addr().get()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        debug!("returning arena at {:p} to the platform", self.base);

        // SAFETY: `base` is the start of the mapping `reserve` created and
        // nothing is handed out past the owning allocator's lifetime.
        unsafe { Kernel::return_memory(self.base.as_ptr(), ARENA_SIZE) };
    }
}

#[cfg(unix)]
mod unix {
    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    use libc::{MAP_ANONYMOUS, MAP_PRIVATE, PROT_READ, PROT_WRITE, mmap, munmap, off_t, size_t};

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-write, private, not backed by any file.
            const PROT: c_int = PROT_READ | PROT_WRITE;
            const FLAGS: c_int = MAP_PRIVATE | MAP_ANONYMOUS;

            unsafe {
                let addr = mmap(
                    std::ptr::null_mut::<c_void>(),
                    len as size_t,
                    PROT,
                    FLAGS,
                    -1,
                    0 as off_t,
                );

                if addr == libc::MAP_FAILED {
                    None
                } else {
                    Some(NonNull::new_unchecked(addr).cast::<u8>())
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::Memory;

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, Memory::PAGE_READWRITE);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_is_readable_and_writable() {
        let arena = Arena::reserve().expect("platform refused the arena");

        unsafe {
            let first = arena.offset_to_ptr(0).as_ptr();
            let last = arena.offset_to_ptr(ARENA_SIZE - 1).as_ptr();

            first.write(0xAA);
            last.write(0x55);

            assert_eq!(first.read(), 0xAA);
            assert_eq!(last.read(), 0x55);
        }
    }

    #[test]
    fn offset_translation_round_trips() {
        let arena = Arena::reserve().expect("platform refused the arena");

        for offset in [0, 4096, ARENA_SIZE - 4096] {
            let ptr = arena.offset_to_ptr(offset);
            assert_eq!(arena.ptr_to_offset(ptr), offset);
        }
    }
}
