use std::ptr::NonNull;

/// Source of the pages the allocator carves blocks out of.
///
/// The allocator, as our top level view of this, has nothing to do with the
/// concrete APIs offered by each kernel. [`Kernel`] is the implementation
/// backed by the operating system, tests plug in their own.
///
/// # Safety
///
/// Implementors must hand out regions that are exclusively owned by the
/// caller until unmapped, at least `len` bytes long, readable and writable,
/// and aligned to at least [`crate::ALIGNMENT`] bytes. [`PageProvider::page_size`]
/// must be a power of two no smaller than [`crate::ALIGNMENT`] and must not
/// change over the lifetime of the provider.
pub unsafe trait PageProvider {
    /// Maps a fresh region of `len` bytes. `len` is always a multiple of
    /// [`PageProvider::page_size`]. Returns `None` if the region can't be mapped.
    fn map(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns a region obtained from [`PageProvider::map`].
    ///
    /// # Safety
    ///
    /// `addr` and `len` must be exactly those of a previous `map` call, and
    /// nothing may access the region afterwards.
    unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize);

    /// Virtual memory page size in bytes. This is usually 4096.
    fn page_size(&self) -> usize;
}

/// Page provider backed by the operating system: `mmap`/`munmap` on unix,
/// `VirtualAlloc`/`VirtualFree` on Windows.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    /// We can't know it at compile time, so it's queried once on creation.
    page_size: usize,
}

/// Low level memory syscalls, implemented once per platform.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

impl Kernel {
    pub fn new() -> Self {
        let page_size = unsafe { <Self as PlatformMemory>::page_size() };

        Self { page_size }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl PageProvider for Kernel {
    fn map(&mut self, len: usize) -> Option<NonNull<u8>> {
        let addr = unsafe { Self::request_memory(len) };

        if addr.is_none() {
            log::warn!("kernel refused to map {len} bytes");
        }

        addr
    }

    unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) {
        unsafe { Self::return_memory(addr.as_ptr(), len) }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            let result = unsafe { munmap(addr.cast::<c_void>(), len as size_t) };

            if result != 0 {
                log::warn!("munmap of {len} bytes at {addr:p} failed");
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            // MEM_RELEASE frees the whole reservation and requires a zero size.
            let result = unsafe { Memory::VirtualFree(addr.cast::<c_void>(), 0, Memory::MEM_RELEASE) };

            if let Err(err) = result {
                log::warn!("VirtualFree of {len} bytes at {addr:p} failed: {err}");
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
