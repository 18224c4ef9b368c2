use crate::{tensor::Buffer, ElementType, Result};

/// Max size of all pooled buffers, in bytes.
/// Currently 1GB.
const MAX_POOLED_BYTES: usize = 1024 * 1024 * 1024;
/// When total pooled bytes exceed this, trim largest buffers down to this level.
const TRIM_THRESHOLD: usize = MAX_POOLED_BYTES / 2;

/// Tracks arena usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaMetrics {
    /// Bytes held by `Static` tensors after the last allocation pass.
    pub live_bytes: usize,
    /// Largest `live_bytes` seen over the arena's lifetime.
    pub high_water_mark: usize,
    /// Current total capacity of all pooled buffers, in bytes.
    pub pooled_bytes: usize,
    /// Number of times a buffer was reused instead of allocated.
    pub hits: usize,
    /// Number of times a new buffer was allocated.
    pub misses: usize,
    /// Number of times a buffer was dropped due to pool size cap.
    pub drops: usize,
}

#[derive(Debug, Default)]
/// Backing store for the `Static` tensors of one subgraph.
///
/// Storage given up by tensors (for example on a `Static` to `Dynamic`
/// transition) is pooled and handed out again by later allocation passes.
pub struct Arena {
    pool: Vec<Buffer>,
    metrics: ArenaMetrics,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zeroed buffer of `len` elements, reusing the smallest pooled buffer of
    /// the same element type that fits.
    pub(crate) fn acquire(&mut self, dtype: ElementType, len: usize) -> Result<Buffer> {
        let mut smallest_found = None;
        for (i, buf) in self.pool.iter().enumerate() {
            if buf.dtype() != dtype || buf.capacity() < len {
                continue;
            }
            let smaller = smallest_found
                .map_or(true, |found: usize| buf.capacity() < self.pool[found].capacity());
            if smaller {
                smallest_found = Some(i);
            }
        }

        if let Some(idx) = smallest_found {
            // record a reuse hit
            self.metrics.hits += 1;
            let mut buf = self.pool.swap_remove(idx);
            self.metrics.pooled_bytes = self
                .metrics
                .pooled_bytes
                .saturating_sub(buf.capacity_bytes());
            buf.reset(len)?;
            debug_assert_eq!(self.metrics.pooled_bytes, self.pooled_capacity());
            Ok(buf)
        } else {
            // record an allocation miss
            self.metrics.misses += 1;
            Buffer::zeroed(dtype, len)
        }
    }

    /// Return a buffer back into the pool for reuse.
    pub(crate) fn release(&mut self, buf: Buffer) {
        let buffer_bytes = buf.capacity_bytes();
        if self.metrics.pooled_bytes + buffer_bytes <= MAX_POOLED_BYTES {
            self.metrics.pooled_bytes += buffer_bytes;
            self.pool.push(buf);
            debug_assert_eq!(self.metrics.pooled_bytes, self.pooled_capacity());
            self.trim_excess();
        } else {
            // record a dropped buffer due to cap
            self.metrics.drops += 1;
        }
    }

    /// Record the bytes held by `Static` tensors at the end of an allocation pass.
    pub(crate) fn record_live(&mut self, bytes: usize) {
        self.metrics.live_bytes = bytes;
        self.metrics.high_water_mark = self.metrics.high_water_mark.max(bytes);
    }

    /// Remove largest buffers until total pooled bytes <= TRIM_THRESHOLD.
    fn trim_excess(&mut self) {
        while self.metrics.pooled_bytes > TRIM_THRESHOLD {
            let Some((max_idx, max_bytes)) = self
                .pool
                .iter()
                .enumerate()
                .map(|(i, buf)| (i, buf.capacity_bytes()))
                .max_by_key(|(_, bytes)| *bytes)
            else {
                break;
            };
            self.pool.swap_remove(max_idx);
            self.metrics.pooled_bytes = self.metrics.pooled_bytes.saturating_sub(max_bytes);
        }
        debug_assert_eq!(self.metrics.pooled_bytes, self.pooled_capacity());
    }

    fn pooled_capacity(&self) -> usize {
        self.pool.iter().map(Buffer::capacity_bytes).sum()
    }

    /// Returns a snapshot of current arena metrics.
    pub fn metrics(&self) -> ArenaMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_smallest_fitting_buffer_of_the_same_type() {
        let mut arena = Arena::new();
        let small = arena.acquire(ElementType::Int32, 4).unwrap();
        let large = arena.acquire(ElementType::Int32, 16).unwrap();
        assert_eq!(arena.metrics().misses, 2);

        arena.release(large);
        arena.release(small);
        assert_eq!(arena.metrics().pooled_bytes, 20 * 4);

        // A float request cannot use int storage.
        let floats = arena.acquire(ElementType::Float32, 2).unwrap();
        assert_eq!(floats.dtype(), ElementType::Float32);
        assert_eq!(arena.metrics().misses, 3);

        let reused = arena.acquire(ElementType::Int32, 3).unwrap();
        assert_eq!(reused.len(), 3);
        assert!(reused.capacity() < 16);
        assert_eq!(arena.metrics().hits, 1);
        assert_eq!(arena.metrics().pooled_bytes, 16 * 4);
    }

    #[test]
    fn reused_storage_is_zeroed() {
        let mut arena = Arena::new();
        arena.release(Buffer::from(vec![7i32; 8]));
        let buffer = arena.acquire(ElementType::Int32, 8).unwrap();
        assert_eq!(buffer, Buffer::from(vec![0i32; 8]));
    }

    #[test]
    fn tracks_live_high_water_mark() {
        let mut arena = Arena::new();
        arena.record_live(100);
        arena.record_live(40);
        let metrics = arena.metrics();
        assert_eq!(metrics.live_bytes, 40);
        assert_eq!(metrics.high_water_mark, 100);
    }
}
