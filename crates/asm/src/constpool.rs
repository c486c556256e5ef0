//! A deduplicating pool of aligned read-only constants.
//!
//! The pool avoids emitting the same constant multiple times: inserting data
//! returns a stable byte offset within the pool, and inserting identical data
//! again returns the same offset. Entries are bucketed by rounded size
//! (1, 2, 4, 8, 16, 32 or 64 bytes) and each entry is aligned to its bucket
//! size, so the pool can serve scalar immediates and full ZMM constants from
//! one section.
//!
//! Offsets are assigned when `insert` returns and never move: emitters bake
//! `pool label + offset` into fix-ups before the pool is folded, which rules
//! out any reordering at write-out. Layout is therefore insertion order with
//! each entry rounded up to its bucket alignment; a small entry inserted
//! before a larger one leaves a zero-filled gap. The holder folds the pool
//! into a section when an emitter requests it, binding the pool's label at
//! the fold point.

use crate::buffer::CodeBuffer;
use crate::error::{CodeResult, Error};
use rustc_hash::FxHashMap;

/// Bucket element sizes, smallest to largest.
const BUCKET_SIZES: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

/// A deduplicating, size-bucketed constant pool.
#[derive(Default)]
pub struct ConstPool {
    /// Entry data (padded to bucket size) at its assigned pool offset.
    entries: Vec<(u32, Vec<u8>)>,
    /// Dedup index over padded entry data.
    index: FxHashMap<Vec<u8>, u32>,
    /// One past the end of the last entry.
    len: u32,
    /// Largest bucket size used so far; the pool's required alignment.
    alignment: u32,
}

impl ConstPool {
    pub fn new() -> Self {
        ConstPool::default()
    }

    /// Whether the pool holds no data.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pool size in bytes, including alignment gaps.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// The alignment the pool requires of its containing section; 1 when the
    /// pool is empty.
    pub fn alignment(&self) -> u32 {
        self.alignment.max(1)
    }

    /// Insert `data` and return its offset within the pool. Identical data
    /// deduplicates to the same offset.
    ///
    /// Data longer than the largest bucket (64 bytes) is rejected with
    /// `InvalidArgument`; empty data as well.
    pub fn insert(&mut self, data: &[u8]) -> CodeResult<u32> {
        let bucket = BUCKET_SIZES
            .iter()
            .copied()
            .find(|&b| data.len() as u32 <= b)
            .ok_or(Error::InvalidArgument)?;
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let mut padded = data.to_vec();
        padded.resize(bucket as usize, 0);

        if let Some(&offset) = self.index.get(&padded) {
            return Ok(offset);
        }

        // Each entry is aligned to its bucket size; offsets are assigned in
        // insertion order, so mixing sizes may leave zero-filled gaps.
        let offset = (self.len + bucket - 1) & !(bucket - 1);
        self.len = offset + bucket;
        self.alignment = self.alignment.max(bucket);
        self.index.insert(padded.clone(), offset);
        self.entries.push((offset, padded));
        Ok(offset)
    }

    /// Append the pool's bytes to `buf`. The caller is responsible for
    /// aligning `buf` to [`ConstPool::alignment`] first.
    pub fn write_to(&self, buf: &mut CodeBuffer) {
        let start = buf.offset();
        let mut cursor = start;
        for (offset, data) in &self.entries {
            let at = start + offset;
            // Entries are offset-ordered; zero-fill any alignment gap.
            debug_assert!(at >= cursor);
            for _ in cursor..at {
                buf.put1(0);
            }
            buf.put_bytes(data);
            cursor = at + data.len() as u32;
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.len = 0;
        self.alignment = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_returns_same_offset() {
        let mut pool = ConstPool::new();
        let a = pool.insert(&1u64.to_le_bytes()).unwrap();
        let b = pool.insert(&2u64.to_le_bytes()).unwrap();
        let c = pool.insert(&1u64.to_le_bytes()).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 16);
    }

    #[test]
    fn entries_are_bucket_aligned() {
        let mut pool = ConstPool::new();
        let small = pool.insert(&[0xAB]).unwrap();
        let wide = pool.insert(&[0xCD; 16]).unwrap();
        assert_eq!(small, 0);
        assert_eq!(wide, 16);
        assert_eq!(pool.alignment(), 16);
        // Insertion-order layout: the gap behind the 1-byte entry is kept.
        assert_eq!(pool.len(), 32);

        let mut buf = CodeBuffer::new();
        pool.write_to(&mut buf);
        assert_eq!(buf.data()[0], 0xAB);
        assert_eq!(buf.data()[wide as usize], 0xCD);
    }

    #[test]
    fn oversized_and_empty_data_are_rejected() {
        let mut pool = ConstPool::new();
        assert_eq!(pool.insert(&[0; 65]).unwrap_err(), Error::InvalidArgument);
        assert_eq!(pool.insert(&[]).unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn short_data_is_zero_padded_for_dedup() {
        let mut pool = ConstPool::new();
        let a = pool.insert(&[1, 0, 0]).unwrap();
        let b = pool.insert(&[1, 0, 0, 0]).unwrap();
        // Both pad to the 4-byte bucket with identical bytes.
        assert_eq!(a, b);
    }
}
