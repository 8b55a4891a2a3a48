//! Read-only mmap view over an on-disk file.
//!
//! `partitionIndex` and `<stem>.index` are dense arrays of 4-byte integers
//! that are only ever scanned or binary-searched, never mutated through a
//! mapping (all writes go through buffered `File::write_all` under an
//! exclusive lock, per §4.C). A read-only `memmap2::Mmap` avoids copying the
//! whole index into a `Vec` on every lookup while keeping the write path's
//! locking story simple.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::codec::{unpack_i32, I32_SIZE};
use crate::error::Result;

pub struct IndexView {
    mmap: Option<Mmap>,
}

impl IndexView {
    /// Map `path` read-only. A missing or empty file maps to an empty view
    /// rather than an error — most callers treat "no entries yet" as a
    /// normal state, not a corruption.
    pub fn open(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { mmap: None })
            }
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Self { mmap: None });
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }

    /// Number of `i32` entries in the view.
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len() / I32_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read entry `i` (0-based). Panics if `i >= self.len()`; callers always
    /// bounds-check via `len()` first.
    pub fn get(&self, i: usize) -> i32 {
        let mmap = self.mmap.as_ref().expect("index non-empty");
        let start = i * I32_SIZE;
        unpack_i32(&mmap[start..start + I32_SIZE])
    }

    /// Binary search for the entry `e` such that `e <= needle` and either
    /// `e` is the last entry or the next entry is `> needle`. Mirrors
    /// `current_partition`'s tie-break: an exact match selects that
    /// segment, and a needle past the last entry overflows into it.
    pub fn segment_for(&self, needle: i32) -> Option<usize> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let (mut low, mut high) = (0usize, len - 1);
        while low < high {
            let mid = low + (high - low + 1) / 2;
            if self.get(mid) <= needle {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        Some(low)
    }
}
