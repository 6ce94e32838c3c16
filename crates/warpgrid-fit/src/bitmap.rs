//! Byte-aligned fixed-size bit set.
//!
//! Used by the network index to track which ports are taken on a host
//! network. A full port bitmap is 65536 bits (8 KiB), which is why the
//! network index pools them instead of reallocating per fit call.

use crate::error::{FitError, FitResult};

/// Bits needed to index every port number.
pub const PORT_SPACE_BITS: usize = 65536;

/// A fixed-capacity bit set. Bit `i` lives in byte `i / 8`, bit `i % 8`.
///
/// Indexing past [`Bitmap::size`] panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    /// Create a bitmap with `size` bits, all clear.
    ///
    /// `size` must be a positive multiple of 8.
    pub fn new(size: usize) -> FitResult<Self> {
        if size == 0 || size % 8 != 0 {
            return Err(FitError::InvalidBitmapSize(size));
        }
        Ok(Self {
            bytes: vec![0; size / 8],
        })
    }

    /// A bitmap with one bit per port number (0..=65535).
    pub(crate) fn for_ports() -> Self {
        Self {
            bytes: vec![0; PORT_SPACE_BITS / 8],
        }
    }

    /// Capacity in bits.
    pub fn size(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn set(&mut self, idx: usize) {
        self.bytes[idx >> 3] |= 1 << (idx & 7);
    }

    pub fn unset(&mut self, idx: usize) {
        self.bytes[idx >> 3] &= !(1 << (idx & 7));
    }

    pub fn check(&self, idx: usize) -> bool {
        self.bytes[idx >> 3] & (1 << (idx & 7)) != 0
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Ascending indexes in `[from, to)` whose bit equals `set`.
    ///
    /// `to` is clamped to the bitmap size.
    pub fn indexes_in_range(&self, set: bool, from: usize, to: usize) -> Indexes<'_> {
        Indexes {
            bitmap: self,
            want: set,
            next: from,
            end: to.min(self.size()),
        }
    }

    /// Ascending indexes across the whole bitmap whose bit equals `set`.
    pub fn indexes(&self, set: bool) -> Indexes<'_> {
        self.indexes_in_range(set, 0, self.size())
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// Lazy iterator returned by [`Bitmap::indexes_in_range`].
#[derive(Debug)]
pub struct Indexes<'a> {
    bitmap: &'a Bitmap,
    want: bool,
    next: usize,
    end: usize,
}

impl Iterator for Indexes<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.end {
            let idx = self.next;

            // Skip whole bytes that cannot contain a match.
            if idx & 7 == 0 && idx + 8 <= self.end {
                let byte = self.bitmap.bytes[idx >> 3];
                let skip = if self.want { byte == 0 } else { byte == 0xff };
                if skip {
                    self.next += 8;
                    continue;
                }
            }

            self.next += 1;
            if self.bitmap.check(idx) == self.want {
                return Some(idx);
            }
        }
        None
    }
}
