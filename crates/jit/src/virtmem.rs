//! Virtual-memory primitives.
//!
//! A thin platform adapter over the host's paging interface: reserve and
//! release mappings, change protection, query the page size, and synchronize
//! the instruction cache. The allocator above never touches an OS API
//! directly.

use std::sync::OnceLock;

use anvil_asm::CodeResult;

/// Page protection of a mapped range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protection {
    None,
    ReadWrite,
    ReadExec,
    ReadWriteExec,
}

/// The host page size; queried once and cached.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(imp::query_page_size)
}

/// The host allocation granularity: the alignment the OS gives fresh
/// mappings. Equal to the page size on Unix, usually 64 KiB on Windows.
pub fn alloc_granularity() -> usize {
    static GRANULARITY: OnceLock<usize> = OnceLock::new();
    *GRANULARITY.get_or_init(imp::query_alloc_granularity)
}

/// Round `len` up to a whole number of pages.
pub fn round_up_to_pages(len: usize) -> usize {
    let page = page_size();
    len.checked_add(page - 1).map_or(usize::MAX, |v| v & !(page - 1))
}

/// Reserve and commit `len` bytes of zeroed private memory with the given
/// protection. `len` must be page-rounded.
pub fn reserve(len: usize, protection: Protection) -> CodeResult<*mut u8> {
    imp::reserve(len, protection)
}

/// Change the protection of a page-rounded range.
pub fn protect(ptr: *mut u8, len: usize, protection: Protection) -> CodeResult<()> {
    imp::protect(ptr, len, protection)
}

/// Return a mapping obtained from [`reserve`] to the OS.
pub fn release(ptr: *mut u8, len: usize) -> CodeResult<()> {
    imp::release(ptr, len)
}

/// Two views of the same physical pages: `rx` is executable and never
/// writable, `rw` is writable and never executable.
#[derive(Clone, Copy, Debug)]
pub struct DualMapping {
    pub rx: *mut u8,
    pub rw: *mut u8,
}

/// Map `len` bytes twice, as an RX view and an RW view. Fails with
/// `ExecutableMemoryFailed` on hosts without an anonymous-file mechanism.
pub fn alloc_dual_mapping(len: usize) -> CodeResult<DualMapping> {
    imp::alloc_dual_mapping(len)
}

/// Release both views of a dual mapping.
pub fn release_dual_mapping(mapping: DualMapping, len: usize) -> CodeResult<()> {
    imp::release(mapping.rx, len)?;
    imp::release(mapping.rw, len)
}

/// Make writes to an instruction range visible to the instruction fetcher.
///
/// x86 keeps caches coherent, so only a compiler fence is needed; AArch64
/// requires an explicit clean/invalidate sequence.
pub fn flush_instruction_cache(ptr: *const u8, len: usize) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        // Clean the data cache to the point of unification, invalidate the
        // instruction cache, then synchronize. Line size is conservatively
        // the architectural minimum of 64 bytes.
        const LINE: usize = 64;
        let start = ptr as usize & !(LINE - 1);
        let end = ptr as usize + len;
        let mut addr = start;
        while addr < end {
            core::arch::asm!("dc cvau, {0}", in(reg) addr);
            addr += LINE;
        }
        core::arch::asm!("dsb ish");
        let mut addr = start;
        while addr < end {
            core::arch::asm!("ic ivau, {0}", in(reg) addr);
            addr += LINE;
        }
        core::arch::asm!("dsb ish", "isb");
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        let _ = (ptr, len);
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod imp {
            use super::Protection;
            use anvil_asm::{CodeResult, Error};
            use rustix::mm::{self, MapFlags, MprotectFlags, ProtFlags};

            pub fn query_page_size() -> usize {
                rustix::param::page_size()
            }

            pub fn query_alloc_granularity() -> usize {
                rustix::param::page_size()
            }

            fn prot_flags(protection: Protection) -> ProtFlags {
                match protection {
                    Protection::None => ProtFlags::empty(),
                    Protection::ReadWrite => ProtFlags::READ | ProtFlags::WRITE,
                    Protection::ReadExec => ProtFlags::READ | ProtFlags::EXEC,
                    Protection::ReadWriteExec => ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC,
                }
            }

            fn mprotect_flags(protection: Protection) -> MprotectFlags {
                match protection {
                    Protection::None => MprotectFlags::empty(),
                    Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
                    Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
                    Protection::ReadWriteExec => {
                        MprotectFlags::READ | MprotectFlags::WRITE | MprotectFlags::EXEC
                    }
                }
            }

            pub fn reserve(len: usize, protection: Protection) -> CodeResult<*mut u8> {
                let ptr = unsafe {
                    mm::mmap_anonymous(
                        core::ptr::null_mut(),
                        len,
                        prot_flags(protection),
                        MapFlags::PRIVATE,
                    )
                }
                .map_err(|_| Error::OutOfMemory)?;
                Ok(ptr.cast())
            }

            pub fn protect(ptr: *mut u8, len: usize, protection: Protection) -> CodeResult<()> {
                unsafe { mm::mprotect(ptr.cast(), len, mprotect_flags(protection)) }
                    .map_err(|_| Error::ProtectionFailed)
            }

            pub fn release(ptr: *mut u8, len: usize) -> CodeResult<()> {
                unsafe { mm::munmap(ptr.cast(), len) }.map_err(|_| Error::InvalidArgument)
            }

            #[cfg(target_os = "linux")]
            pub fn alloc_dual_mapping(len: usize) -> CodeResult<super::DualMapping> {
                let memfd = memfd::MemfdOptions::default()
                    .close_on_exec(true)
                    .create("anvil-jit")
                    .map_err(|_| Error::ExecutableMemoryFailed)?;
                memfd
                    .as_file()
                    .set_len(len as u64)
                    .map_err(|_| Error::ExecutableMemoryFailed)?;

                let rx = unsafe {
                    mm::mmap(
                        core::ptr::null_mut(),
                        len,
                        ProtFlags::READ | ProtFlags::EXEC,
                        MapFlags::SHARED,
                        memfd.as_file(),
                        0,
                    )
                }
                .map_err(|_| Error::ExecutableMemoryFailed)?;
                let rw = unsafe {
                    mm::mmap(
                        core::ptr::null_mut(),
                        len,
                        ProtFlags::READ | ProtFlags::WRITE,
                        MapFlags::SHARED,
                        memfd.as_file(),
                        0,
                    )
                };
                let rw = match rw {
                    Ok(rw) => rw,
                    Err(_) => {
                        let _ = unsafe { mm::munmap(rx, len) };
                        return Err(Error::ExecutableMemoryFailed);
                    }
                };
                // The fd may close; the mappings keep the pages alive.
                Ok(super::DualMapping {
                    rx: rx.cast(),
                    rw: rw.cast(),
                })
            }

            #[cfg(not(target_os = "linux"))]
            pub fn alloc_dual_mapping(_len: usize) -> CodeResult<super::DualMapping> {
                Err(Error::ExecutableMemoryFailed)
            }
        }
    } else if #[cfg(windows)] {
        mod imp {
            use super::Protection;
            use anvil_asm::{CodeResult, Error};
            use windows_sys::Win32::System::Memory::{
                VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
                PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_READWRITE,
            };
            use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

            fn system_info() -> SYSTEM_INFO {
                unsafe {
                    let mut info = core::mem::zeroed();
                    GetSystemInfo(&mut info);
                    info
                }
            }

            pub fn query_page_size() -> usize {
                system_info().dwPageSize as usize
            }

            pub fn query_alloc_granularity() -> usize {
                system_info().dwAllocationGranularity as usize
            }

            fn page_flags(protection: Protection) -> u32 {
                match protection {
                    Protection::None => PAGE_NOACCESS,
                    Protection::ReadWrite => PAGE_READWRITE,
                    Protection::ReadExec => PAGE_EXECUTE_READ,
                    Protection::ReadWriteExec => PAGE_EXECUTE_READWRITE,
                }
            }

            pub fn reserve(len: usize, protection: Protection) -> CodeResult<*mut u8> {
                let ptr = unsafe {
                    VirtualAlloc(
                        core::ptr::null(),
                        len,
                        MEM_COMMIT | MEM_RESERVE,
                        page_flags(protection),
                    )
                };
                if ptr.is_null() {
                    return Err(Error::OutOfMemory);
                }
                Ok(ptr.cast())
            }

            pub fn protect(ptr: *mut u8, len: usize, protection: Protection) -> CodeResult<()> {
                let mut old = 0u32;
                let ok = unsafe { VirtualProtect(ptr.cast(), len, page_flags(protection), &mut old) };
                if ok == 0 {
                    return Err(Error::ProtectionFailed);
                }
                Ok(())
            }

            pub fn release(ptr: *mut u8, _len: usize) -> CodeResult<()> {
                let ok = unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
                if ok == 0 {
                    return Err(Error::InvalidArgument);
                }
                Ok(())
            }

            pub fn alloc_dual_mapping(_len: usize) -> CodeResult<super::DualMapping> {
                Err(Error::ExecutableMemoryFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert_eq!(round_up_to_pages(1), page_size());
        assert_eq!(round_up_to_pages(page_size()), page_size());
    }

    #[test]
    fn reserve_write_protect_release() {
        let len = round_up_to_pages(4096);
        let ptr = reserve(len, Protection::ReadWrite).unwrap();
        unsafe {
            ptr.write(0xAB);
            assert_eq!(ptr.read(), 0xAB);
        }
        protect(ptr, len, Protection::ReadExec).unwrap();
        unsafe {
            assert_eq!(ptr.read(), 0xAB);
        }
        release(ptr, len).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dual_mapping_views_alias() {
        let len = round_up_to_pages(4096);
        let mapping = alloc_dual_mapping(len).unwrap();
        unsafe {
            mapping.rw.write(0x5A);
            assert_eq!(mapping.rx.read(), 0x5A);
        }
        release_dual_mapping(mapping, len).unwrap();
    }
}
