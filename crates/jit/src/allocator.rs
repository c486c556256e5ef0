//! The executable-memory allocator.
//!
//! Large OS-reserved blocks are carved into fixed-size granules tracked by
//! two bit arrays per block: `used` marks granules belonging to a live
//! allocation and `stop` marks the last granule of each allocation. A block
//! is a node of an address-keyed red-black tree (for pointer-to-block
//! lookups on release) and of an intrusive list (for first-fit scans).
//!
//! W^X: with dual mapping, callers write through the RW view while the RX
//! view stays executable. Without it, a block's pages start writable and
//! [`JitAllocator::flush`] seals the whole block read+execute; a sealed
//! block no longer serves new allocations until it drains empty and is
//! unsealed again.

use std::sync::Mutex;

use anvil_asm::{CodeResult, Error};
use log::{debug, trace};

use crate::addrtree::{AddrNode, AddrTree, RbLinks, NIL};
use crate::virtmem::{self, Protection};

/// Configuration for a [`JitAllocator`].
#[derive(Clone, Copy, Debug)]
pub struct JitAllocatorOptions {
    /// Smallest allocation unit and alignment, a power of two >= 64.
    pub granularity: u32,
    /// Size of the first reserved block; later blocks double until
    /// `max_block_size`.
    pub block_size: usize,
    /// Growth cap for reserved blocks.
    pub max_block_size: usize,
    /// Map separate RX and RW views of each block instead of flipping page
    /// protections.
    pub use_dual_mapping: bool,
    /// Keep one fully-empty block reserved instead of returning it to the
    /// OS, to dampen map/unmap churn.
    pub keep_one_empty_block: bool,
    /// Overwrite released ranges with int3 while the block is writable.
    pub fill_released: bool,
}

impl Default for JitAllocatorOptions {
    fn default() -> Self {
        JitAllocatorOptions {
            granularity: 64,
            block_size: 64 * 1024,
            max_block_size: 1024 * 1024,
            use_dual_mapping: false,
            keep_one_empty_block: true,
            fill_released: false,
        }
    }
}

/// One allocation: the executable pointer, the writable pointer (equal to
/// `rx` without dual mapping), and the rounded size.
#[derive(Clone, Copy, Debug)]
pub struct JitSpan {
    rx: *mut u8,
    rw: *mut u8,
    size: usize,
}

impl JitSpan {
    /// The executable address; also the handle passed to `release`.
    pub fn rx(&self) -> *mut u8 {
        self.rx
    }

    /// The writable view of the same bytes.
    pub fn rw(&self) -> *mut u8 {
        self.rw
    }

    /// Allocated size in bytes (the request rounded up to the granularity).
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Allocator statistics, as of one consistent snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JitAllocatorStats {
    /// Bytes reserved from the OS.
    pub reserved_size: usize,
    /// Bytes inside live allocations.
    pub used_size: usize,
    /// Number of reserved blocks.
    pub block_count: u32,
    /// Number of live allocations.
    pub allocation_count: u32,
    /// Largest contiguous free range, in bytes.
    pub largest_free: usize,
}

const BITS: u32 = u64::BITS;

struct Block {
    rx: *mut u8,
    rw: *mut u8,
    size: usize,
    /// Number of granules in the block.
    area: u32,
    used: Vec<u64>,
    stop: Vec<u64>,
    used_count: u32,
    /// Protection has been flipped to RX (single-mapping mode only).
    sealed: bool,
    live: bool,
    prev: u32,
    next: u32,
    rb: RbLinks,
}

impl AddrNode for Block {
    fn addr(&self) -> usize {
        self.rx as usize
    }
    fn rb(&self) -> &RbLinks {
        &self.rb
    }
    fn rb_mut(&mut self) -> &mut RbLinks {
        &mut self.rb
    }
}

impl Block {
    fn bit(bits: &[u64], i: u32) -> bool {
        bits[(i / BITS) as usize] & (1 << (i % BITS)) != 0
    }

    fn set_bit(bits: &mut [u64], i: u32, value: bool) {
        let word = &mut bits[(i / BITS) as usize];
        if value {
            *word |= 1 << (i % BITS);
        } else {
            *word &= !(1 << (i % BITS));
        }
    }

    /// First-fit scan for `count` free granules starting at a multiple of
    /// `step`.
    fn find_run(&self, count: u32, step: u32) -> Option<u32> {
        let mut i = 0;
        while i + count <= self.area {
            let mut free = true;
            for j in i..i + count {
                if Self::bit(&self.used, j) {
                    // Jump past the occupied granule, re-aligned.
                    i = (j + 1).next_multiple_of(step);
                    free = false;
                    break;
                }
            }
            if free {
                return Some(i);
            }
        }
        None
    }

    /// Longest run of free granules.
    fn largest_free_run(&self) -> u32 {
        let mut best = 0;
        let mut run = 0;
        for i in 0..self.area {
            if Self::bit(&self.used, i) {
                run = 0;
            } else {
                run += 1;
                best = best.max(run);
            }
        }
        best
    }
}

struct Inner {
    blocks: Vec<Block>,
    free_slots: Vec<u32>,
    head: u32,
    tail: u32,
    tree: AddrTree,
    reserved: usize,
    used_granules: u64,
    allocation_count: u32,
    next_block_size: usize,
}

/// A thread-safe allocator of executable memory spans.
///
/// All state is behind one mutex held for the duration of a single call;
/// OS calls (map, protect, unmap) happen under the lock.
pub struct JitAllocator {
    options: JitAllocatorOptions,
    inner: Mutex<Inner>,
}

// Raw block pointers are plain addresses here; all access to the shared
// state goes through the mutex.
unsafe impl Send for JitAllocator {}
unsafe impl Sync for JitAllocator {}

impl JitAllocator {
    /// Create an allocator with default options.
    pub fn new() -> CodeResult<Self> {
        Self::with_options(JitAllocatorOptions::default())
    }

    pub fn with_options(options: JitAllocatorOptions) -> CodeResult<Self> {
        if !options.granularity.is_power_of_two() || options.granularity < 64 {
            return Err(Error::InvalidOption);
        }
        if options.block_size == 0 || options.max_block_size < options.block_size {
            return Err(Error::InvalidOption);
        }
        Ok(JitAllocator {
            options,
            inner: Mutex::new(Inner {
                blocks: Vec::new(),
                free_slots: Vec::new(),
                head: NIL,
                tail: NIL,
                tree: AddrTree::new(),
                reserved: 0,
                used_granules: 0,
                allocation_count: 0,
                next_block_size: options.block_size,
            }),
        })
    }

    pub fn options(&self) -> &JitAllocatorOptions {
        &self.options
    }

    /// Allocate `size` bytes aligned to `align` (which is raised to the
    /// granularity). Zero sizes are rejected with `InvalidArgument`.
    pub fn alloc(&self, size: usize, align: u32) -> CodeResult<JitSpan> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        if align != 0 && !align.is_power_of_two() {
            return Err(Error::BadAlignment);
        }
        let g = self.options.granularity;
        let align = align.max(g);
        if align as usize > virtmem::page_size() {
            return Err(Error::BadAlignment);
        }
        let count = u32::try_from(size.div_ceil(g as usize)).map_err(|_| Error::OutOfMemory)?;
        let step = align / g;

        let mut inner = self.inner.lock().unwrap();

        // First fit over the block list.
        let mut cursor = inner.head;
        while cursor != NIL {
            let block = &inner.blocks[cursor as usize];
            if !block.sealed && block.area - block.used_count >= count {
                if let Some(index) = block.find_run(count, step) {
                    return Ok(self.commit_run(&mut inner, cursor, index, count));
                }
            }
            cursor = inner.blocks[cursor as usize].next;
        }

        // No block fits; reserve a new one and retry there.
        let block_idx = self.grow(&mut inner, count)?;
        let index = inner.blocks[block_idx as usize]
            .find_run(count, step)
            .ok_or(Error::OutOfMemory)?;
        Ok(self.commit_run(&mut inner, block_idx, index, count))
    }

    fn commit_run(&self, inner: &mut Inner, block_idx: u32, index: u32, count: u32) -> JitSpan {
        let g = self.options.granularity as usize;
        let block = &mut inner.blocks[block_idx as usize];
        for i in index..index + count {
            debug_assert!(!Block::bit(&block.used, i));
            Block::set_bit(&mut block.used, i, true);
        }
        Block::set_bit(&mut block.stop, index + count - 1, true);
        block.used_count += count;
        inner.used_granules += u64::from(count);
        inner.allocation_count += 1;
        let offset = index as usize * g;
        trace!(
            "alloc {} granules at block {:p} offset {:#x}",
            count,
            inner.blocks[block_idx as usize].rx,
            offset
        );
        let block = &inner.blocks[block_idx as usize];
        JitSpan {
            rx: unsafe { block.rx.add(offset) },
            rw: unsafe { block.rw.add(offset) },
            size: count as usize * g,
        }
    }

    /// Reserve a new block large enough for `count` granules.
    fn grow(&self, inner: &mut Inner, count: u32) -> CodeResult<u32> {
        let g = self.options.granularity as usize;
        let needed = count as usize * g;
        let mut size = inner.next_block_size.max(needed);
        size = virtmem::round_up_to_pages(size);
        inner.next_block_size = (inner.next_block_size * 2).min(self.options.max_block_size);

        let (rx, rw) = if self.options.use_dual_mapping {
            let mapping = virtmem::alloc_dual_mapping(size)?;
            (mapping.rx, mapping.rw)
        } else {
            let ptr = virtmem::reserve(size, Protection::ReadWrite)?;
            (ptr, ptr)
        };
        debug!("reserved jit block: {size:#x} bytes at {rx:p}");

        let area = (size / g) as u32;
        let words = area.div_ceil(BITS) as usize;
        let block = Block {
            rx,
            rw,
            size,
            area,
            used: vec![0; words],
            stop: vec![0; words],
            used_count: 0,
            sealed: false,
            live: true,
            prev: NIL,
            next: NIL,
            rb: RbLinks::new(),
        };

        let idx = match inner.free_slots.pop() {
            Some(idx) => {
                inner.blocks[idx as usize] = block;
                idx
            }
            None => {
                inner.blocks.push(block);
                (inner.blocks.len() - 1) as u32
            }
        };

        // Link at the list tail and into the address tree.
        if inner.tail == NIL {
            inner.head = idx;
        } else {
            let tail = inner.tail;
            inner.blocks[tail as usize].next = idx;
            inner.blocks[idx as usize].prev = tail;
        }
        inner.tail = idx;
        inner.tree.insert(&mut inner.blocks, idx);
        inner.reserved += size;
        Ok(idx)
    }

    /// Find the live block containing `ptr` and the granule index of `ptr`
    /// within it. The pointer must be the base of a live allocation.
    fn locate(&self, inner: &Inner, ptr: *mut u8) -> CodeResult<(u32, u32)> {
        if ptr.is_null() {
            return Err(Error::InvalidArgument);
        }
        let addr = ptr as usize;
        let idx = inner
            .tree
            .floor(&inner.blocks, addr)
            .ok_or(Error::InvalidArgument)?;
        let block = &inner.blocks[idx as usize];
        if !block.live || addr >= block.rx as usize + block.size {
            return Err(Error::InvalidArgument);
        }
        let offset = addr - block.rx as usize;
        let g = self.options.granularity as usize;
        if offset % g != 0 {
            return Err(Error::InvalidArgument);
        }
        let index = (offset / g) as u32;
        // The granule must start an allocation: used, and either first in
        // the block or preceded by a free granule or a stop bit.
        let is_start = Block::bit(&block.used, index)
            && (index == 0
                || !Block::bit(&block.used, index - 1)
                || Block::bit(&block.stop, index - 1));
        if !is_start {
            return Err(Error::InvalidArgument);
        }
        Ok((idx, index))
    }

    /// Granule count of the allocation starting at `index`.
    fn run_len(block: &Block, index: u32) -> u32 {
        let mut end = index;
        while !Block::bit(&block.stop, end) {
            end += 1;
        }
        end - index + 1
    }

    /// Release the allocation whose executable base address is `rx_ptr`.
    ///
    /// Pointers that are null, foreign, or interior to an allocation fail
    /// with `InvalidArgument`.
    pub fn release(&self, rx_ptr: *mut u8) -> CodeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let (block_idx, index) = self.locate(&inner, rx_ptr)?;
        let g = self.options.granularity as usize;

        let block = &mut inner.blocks[block_idx as usize];
        let count = Self::run_len(block, index);
        for i in index..index + count {
            Block::set_bit(&mut block.used, i, false);
        }
        Block::set_bit(&mut block.stop, index + count - 1, false);
        block.used_count -= count;
        inner.used_granules -= u64::from(count);
        inner.allocation_count -= 1;

        let block = &inner.blocks[block_idx as usize];
        if self.options.fill_released && !block.sealed {
            // int3 over the released range, via the writable view.
            unsafe {
                block
                    .rw
                    .add(index as usize * g)
                    .write_bytes(0xCC, count as usize * g);
            }
        }
        trace!("released {} granules at {:p}", count, rx_ptr);

        if inner.blocks[block_idx as usize].used_count == 0 {
            self.retire_block(&mut inner, block_idx)?;
        }
        Ok(())
    }

    /// Handle a block that has drained empty: keep one around (unsealed),
    /// return the rest to the OS.
    fn retire_block(&self, inner: &mut Inner, block_idx: u32) -> CodeResult<()> {
        let another_empty = {
            let mut cursor = inner.head;
            let mut found = false;
            while cursor != NIL {
                let block = &inner.blocks[cursor as usize];
                if cursor != block_idx && block.used_count == 0 {
                    found = true;
                    break;
                }
                cursor = block.next;
            }
            found
        };

        if self.options.keep_one_empty_block && !another_empty {
            // Retained: make it carveable again.
            let block = &mut inner.blocks[block_idx as usize];
            if block.sealed {
                let (rx, size) = (block.rx, block.size);
                virtmem::protect(rx, size, Protection::ReadWrite)?;
                inner.blocks[block_idx as usize].sealed = false;
            }
            return Ok(());
        }

        // Unlink from the list, the tree, and the OS.
        let (prev, next) = {
            let block = &inner.blocks[block_idx as usize];
            (block.prev, block.next)
        };
        if prev != NIL {
            inner.blocks[prev as usize].next = next;
        } else {
            inner.head = next;
        }
        if next != NIL {
            inner.blocks[next as usize].prev = prev;
        } else {
            inner.tail = prev;
        }
        inner.tree.remove(&mut inner.blocks, block_idx);

        let block = &mut inner.blocks[block_idx as usize];
        block.live = false;
        inner.reserved -= block.size;
        let (rx, rw, size, dual) = (block.rx, block.rw, block.size, block.rx != block.rw);
        debug!("returning jit block at {rx:p} ({size:#x} bytes) to the OS");
        if dual {
            virtmem::release_dual_mapping(crate::virtmem::DualMapping { rx, rw }, size)?;
        } else {
            virtmem::release(rx, size)?;
        }
        inner.free_slots.push(block_idx);
        Ok(())
    }

    /// Truncate the allocation at `rx_ptr` to `new_size` bytes in place.
    pub fn shrink(&self, rx_ptr: *mut u8, new_size: usize) -> CodeResult<()> {
        if new_size == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut inner = self.inner.lock().unwrap();
        let (block_idx, index) = self.locate(&inner, rx_ptr)?;
        let g = self.options.granularity as usize;
        let new_count = u32::try_from(new_size.div_ceil(g)).map_err(|_| Error::InvalidArgument)?;

        let block = &mut inner.blocks[block_idx as usize];
        let count = Self::run_len(block, index);
        if new_count > count {
            return Err(Error::InvalidArgument);
        }
        if new_count == count {
            return Ok(());
        }
        Block::set_bit(&mut block.stop, index + count - 1, false);
        Block::set_bit(&mut block.stop, index + new_count - 1, true);
        for i in index + new_count..index + count {
            Block::set_bit(&mut block.used, i, false);
        }
        let freed = count - new_count;
        block.used_count -= freed;
        inner.used_granules -= u64::from(freed);
        Ok(())
    }

    /// Make the allocation at `span` executable and visible to instruction
    /// fetch.
    ///
    /// Without dual mapping this seals the owning block read+execute; the
    /// block stops serving new allocations until it drains empty. With dual
    /// mapping only the instruction cache is synchronized.
    pub fn flush(&self, span: &JitSpan) -> CodeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let (block_idx, _) = self.locate(&inner, span.rx)?;
        let block = &mut inner.blocks[block_idx as usize];
        let dual = block.rx != block.rw;
        if !dual && !block.sealed {
            let (rx, size) = (block.rx, block.size);
            virtmem::protect(rx, size, Protection::ReadExec)?;
            inner.blocks[block_idx as usize].sealed = true;
        }
        virtmem::flush_instruction_cache(span.rx, span.size);
        Ok(())
    }

    /// A consistent snapshot of the allocator's occupancy.
    pub fn stats(&self) -> JitAllocatorStats {
        let inner = self.inner.lock().unwrap();
        let g = self.options.granularity as usize;
        let mut largest = 0u32;
        let mut blocks = 0;
        let mut cursor = inner.head;
        while cursor != NIL {
            let block = &inner.blocks[cursor as usize];
            blocks += 1;
            largest = largest.max(block.largest_free_run());
            cursor = block.next;
        }
        JitAllocatorStats {
            reserved_size: inner.reserved,
            used_size: inner.used_granules as usize * g,
            block_count: blocks,
            allocation_count: inner.allocation_count,
            largest_free: largest as usize * g,
        }
    }
}

impl Drop for JitAllocator {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();
        let mut cursor = inner.head;
        while cursor != NIL {
            let block = &inner.blocks[cursor as usize];
            let next = block.next;
            let (rx, rw, size) = (block.rx, block.rw, block.size);
            let result = if rx != rw {
                virtmem::release_dual_mapping(crate::virtmem::DualMapping { rx, rw }, size)
            } else {
                virtmem::release(rx, size)
            };
            if result.is_err() {
                debug!("leaking jit block at {rx:p}: release failed");
            }
            cursor = next;
        }
    }
}
