//! A small runtime tying the assembler to the executable-memory allocator.
//!
//! [`JitRuntime::add`] takes a finished code holder, lays it out at an
//! address obtained from the allocator, copies the image into place, seals
//! it executable, and hands back the entry pointer. [`JitRuntime::release`]
//! frees one installed unit.

use anvil_asm::code::CodeHolder;
use anvil_asm::{CodeResult, Error};
use log::debug;

use crate::allocator::{JitAllocator, JitAllocatorOptions, JitSpan};
use crate::virtmem;

/// Owns a [`JitAllocator`] and installs assembled code units into it.
pub struct JitRuntime {
    allocator: JitAllocator,
}

impl JitRuntime {
    /// A runtime with default allocator options.
    pub fn new() -> CodeResult<Self> {
        Self::with_options(JitAllocatorOptions::default())
    }

    pub fn with_options(options: JitAllocatorOptions) -> CodeResult<Self> {
        Ok(JitRuntime {
            allocator: JitAllocator::with_options(options)?,
        })
    }

    /// The underlying allocator, e.g. for statistics.
    pub fn allocator(&self) -> &JitAllocator {
        &self.allocator
    }

    /// Lay out `code`, copy it into executable memory, and return the
    /// address of its first byte.
    ///
    /// The holder must be error-free; its sections are placed exactly as
    /// [`CodeHolder::relocate`] places them, starting at the span base.
    pub fn add(&self, code: &mut CodeHolder) -> CodeResult<*const u8> {
        if let Some(err) = code.error() {
            return Err(err);
        }

        // First pass at a zero base establishes the laid-out size; the
        // layout is position-independent in size.
        code.relocate(0)?;
        let size = usize::try_from(code.image_size()?).map_err(|_| Error::OutOfMemory)?;
        if size == 0 {
            return Err(Error::InvalidArgument);
        }

        // Executable sections must land page-aligned; a span at page
        // alignment covers every section alignment up to the page size.
        let align = u32::try_from(virtmem::page_size()).map_err(|_| Error::BadAlignment)?;
        let span = self.allocator.alloc(size, align)?;

        // Final layout against the real base, then copy through the
        // writable view.
        code.relocate(span.rx() as u64)?;
        let image = code.to_image()?;
        debug_assert_eq!(image.len(), size);
        unsafe {
            core::ptr::copy_nonoverlapping(image.as_ptr(), span.rw(), image.len());
        }
        self.allocator.flush(&span)?;
        debug!("installed {size:#x} bytes at {:p}", span.rx());
        Ok(span.rx() as *const u8)
    }

    /// Release an installed code unit by the pointer `add` returned.
    pub fn release(&self, ptr: *const u8) -> CodeResult<()> {
        self.allocator.release(ptr as *mut u8)
    }

    /// Allocate raw executable space without going through a code holder;
    /// the caller fills the writable view and flushes.
    pub fn alloc_span(&self, size: usize) -> CodeResult<JitSpan> {
        self.allocator.alloc(size, 0)
    }
}
