//! Fixed-capacity circular time-series storage
//!
//! [`ScrollingBuffer`] backs every plotted series and every plot's time
//! axis. It grows until its capacity is reached and then overwrites the
//! oldest element, keeping an `offset` that marks the oldest logical entry.
//!
//! The buffer is deliberately not thread-safe: the acquisition thread and
//! any reader share one external mutex (see the plot registry), and readers
//! that need to index freely take a [`ScrollingBuffer::copy_data`] snapshot
//! while holding that lock, then work on the snapshot lock-free. This keeps
//! lock hold time bounded to a memcpy.

/// A circular buffer that scrolls once full.
///
/// A logical index `i` in `[0, len)` maps to physical index
/// `(offset + i) % len`; logical order is always oldest to newest.
#[derive(Debug, Clone)]
pub struct ScrollingBuffer<T> {
    data: Vec<T>,
    max_size: usize,
    offset: usize,
}

impl<T: Copy> ScrollingBuffer<T> {
    /// Create an empty buffer with the given capacity
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            data: Vec::with_capacity(max_size),
            max_size,
            offset: 0,
        }
    }

    /// Number of stored elements (`<= max_size`)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Physical index of the oldest logical element
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Configured capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append a point, overwriting the oldest once the capacity is reached
    pub fn add_point(&mut self, value: T) {
        if self.data.len() < self.max_size {
            self.data.push(value);
        } else {
            self.data[self.offset] = value;
            self.offset = (self.offset + 1) % self.max_size;
        }
    }

    /// Read the element at a logical index (0 = oldest)
    pub fn get(&self, logical: usize) -> Option<T> {
        if logical >= self.data.len() {
            return None;
        }
        Some(self.data[(self.offset + logical) % self.data.len()])
    }

    /// The newest stored element
    pub fn back(&self) -> Option<T> {
        if self.data.is_empty() {
            None
        } else {
            self.get(self.data.len() - 1)
        }
    }

    /// Copy the contents into a linear, oldest-first vector.
    ///
    /// This is the snapshot operation concurrent readers use: take the copy
    /// under the shared lock, release, then index the snapshot freely.
    pub fn copy_data(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.data.len());
        for i in 0..self.data.len() {
            out.push(self.data[(self.offset + i) % self.data.len()]);
        }
        out
    }

    /// Change the capacity.
    ///
    /// The newest elements that fit the new capacity survive; on grow the
    /// buffer simply relinearizes and refills toward the new capacity. This
    /// is a presentation buffer, so discarding overwritten history is fine.
    pub fn set_max_size(&mut self, max_size: usize) {
        let max_size = max_size.max(1);
        if max_size == self.max_size {
            return;
        }
        let mut linear = self.copy_data();
        if linear.len() > max_size {
            linear.drain(..linear.len() - max_size);
        }
        self.data = linear;
        self.data.reserve(max_size.saturating_sub(self.data.len()));
        self.max_size = max_size;
        self.offset = 0;
    }

    /// Reset to empty without releasing the underlying storage
    pub fn erase(&mut self) {
        self.data.clear();
        self.offset = 0;
    }
}

impl ScrollingBuffer<f64> {
    /// Find the logical index whose stored value is closest to `value`.
    ///
    /// The stored values are assumed monotonically non-decreasing in logical
    /// order (timestamps are), so a binary search applies. Returns `None` on
    /// an empty buffer.
    pub fn index_of_value(&self, value: f64) -> Option<usize> {
        let len = self.data.len();
        if len == 0 {
            return None;
        }
        let mut lo = 0usize;
        let mut hi = len;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.get(mid).unwrap_or(f64::INFINITY) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        // lo is the first index >= value; the closest is lo or its predecessor.
        if lo == 0 {
            return Some(0);
        }
        if lo >= len {
            return Some(len - 1);
        }
        let (Some(below), Some(above)) = (self.get(lo - 1), self.get(lo)) else {
            return Some(lo);
        };
        if (value - below).abs() <= (above - value).abs() {
            Some(lo - 1)
        } else {
            Some(lo)
        }
    }

    /// Collect the values between the samples nearest `from` and `to`,
    /// oldest first, walking circularly across the wrap point.
    ///
    /// Used for statistics and export over a marker-selected time range on
    /// the time buffer, and (by logical index) on the series buffers.
    pub fn linear_data(&self, from: f64, to: f64) -> Vec<f64> {
        let (Some(a), Some(b)) = (self.index_of_value(from), self.index_of_value(to)) else {
            return Vec::new();
        };
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        (start..=end).filter_map(|i| self.get(i)).collect()
    }
}
