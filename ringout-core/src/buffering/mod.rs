//! Lock-free SPSC frame ring shared by the producer and the drain thread.
//!
//! `write_pos` is only ever stored by the producer and `read_pos` only by the
//! drain thread. Each side publishes its cursor with `Release` after touching
//! storage and observes the other cursor with `Acquire`, so frames written
//! before a cursor publish are visible to whoever loads that cursor.
//!
//! Storage slots are `AtomicU32` with relaxed access: a packed stereo frame is
//! one machine word, and the cursors carry all the ordering.
//!
//! The ring does not stop the producer from lapping the consumer. Writers are
//! expected to pace themselves with [`FrameRing::writable`].

pub mod chunk;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{DriverError, Result};

/// Default ring capacity: 2^13 = 8192 frames ≈ 186 ms at 44.1 kHz.
pub const DEFAULT_CAPACITY: usize = 1 << 13;

/// Split a run of `count` slots starting at `pos` into the part that fits
/// before the end of storage and the part that wraps to index 0.
///
/// Requires `pos < capacity` and `count <= capacity`.
pub fn split_span(pos: usize, count: usize, capacity: usize) -> (usize, usize) {
    let tail = count.min(capacity - pos);
    (tail, count - tail)
}

pub struct FrameRing {
    storage: Box<[AtomicU32]>,
    capacity: usize,
    mask: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl FrameRing {
    /// Allocate a zeroed ring of `capacity` frames.
    ///
    /// # Errors
    /// `InvalidConfig` if `capacity` is zero or not a power of two,
    /// `Allocation` if the storage cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(DriverError::InvalidConfig(format!(
                "ring capacity must be a non-zero power of two, got {capacity}"
            )));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| DriverError::Allocation { frames: capacity })?;
        storage.extend((0..capacity).map(|_| AtomicU32::new(0)));

        Ok(Self {
            storage: storage.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mask(&self) -> usize {
        self.mask
    }

    /// Frames between `read` and `write`, modulo capacity.
    pub fn available_to_read(&self, read: usize, write: usize) -> usize {
        write.wrapping_sub(read) & self.mask
    }

    pub fn available_to_write(&self, read: usize, write: usize) -> usize {
        self.capacity - self.available_to_read(read, write)
    }

    /// Frames currently buffered, from a live snapshot of both cursors.
    pub fn readable(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.available_to_read(read, write)
    }

    /// Free frames, from a live snapshot of both cursors.
    pub fn writable(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.available_to_write(read, write)
    }

    // ── Producer side ────────────────────────────────────────────────────────

    /// Copy `frames` in at the write cursor and publish the advanced cursor.
    ///
    /// Never blocks and never checks free space; unread frames are overwritten
    /// if the producer outruns the consumer. Returns `frames.len()`.
    ///
    /// When more than `capacity` frames are passed only the trailing
    /// `capacity` frames can survive, so the leading excess is skipped. The
    /// cursor still ends at `(write + frames.len()) & mask`.
    pub fn write(&self, frames: &[u32]) -> usize {
        let count = frames.len();
        if count == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let skip = count.saturating_sub(self.capacity);
        let start = write.wrapping_add(skip) & self.mask;
        let src = &frames[skip..];

        let (tail, head) = split_span(start, src.len(), self.capacity);
        self.store_run(start, &src[..tail]);
        if head > 0 {
            self.store_run(0, &src[tail..]);
        }

        self.write_pos
            .store(write.wrapping_add(count) & self.mask, Ordering::Release);
        count
    }

    fn store_run(&self, start: usize, src: &[u32]) {
        for (slot, &frame) in self.storage[start..start + src.len()].iter().zip(src) {
            slot.store(frame, Ordering::Relaxed);
        }
    }

    // ── Consumer side ────────────────────────────────────────────────────────

    /// Read cursor as last published by the consumer.
    pub fn read_cursor(&self) -> usize {
        self.read_pos.load(Ordering::Acquire)
    }

    /// Write cursor as last published by the producer.
    pub fn write_cursor(&self) -> usize {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Gather `out.len()` frames starting at `read`, wrapping at the end of storage.
    ///
    /// Does not move the read cursor.
    pub fn copy_out(&self, read: usize, out: &mut [u32]) {
        let start = read & self.mask;
        let len = out.len().min(self.capacity);
        let (tail, head) = split_span(start, len, self.capacity);

        for (dst, slot) in out[..tail].iter_mut().zip(&self.storage[start..start + tail]) {
            *dst = slot.load(Ordering::Relaxed);
        }
        for (dst, slot) in out[tail..len].iter_mut().zip(&self.storage[..head]) {
            *dst = slot.load(Ordering::Relaxed);
        }
    }

    /// Publish a new read cursor. Only the consumer may call this.
    pub fn commit_read(&self, read: usize) {
        self.read_pos.store(read & self.mask, Ordering::Release);
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("capacity", &self.capacity)
            .field("read_pos", &self.read_pos.load(Ordering::Relaxed))
            .field("write_pos", &self.write_pos.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all(ring: &FrameRing) -> Vec<u32> {
        let read = ring.read_cursor();
        let mut out = vec![0u32; ring.readable()];
        ring.copy_out(read, &mut out);
        ring.commit_read(read + out.len());
        out
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(matches!(
            FrameRing::new(1000),
            Err(DriverError::InvalidConfig(_))
        ));
        assert!(matches!(FrameRing::new(0), Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn round_trip_preserves_order() {
        let ring = FrameRing::new(64).unwrap();
        let input: Vec<u32> = (0..48).collect();

        assert_eq!(ring.write(&input), 48);
        assert_eq!(ring.readable(), 48);
        assert_eq!(drain_all(&ring), input);
        assert_eq!(ring.readable(), 0);
    }

    #[test]
    fn one_short_of_capacity_round_trips() {
        let ring = FrameRing::new(64).unwrap();
        ring.write(&[0; 5]);
        drain_all(&ring);

        let input: Vec<u32> = (1..64).collect();
        assert_eq!(ring.write(&input), 63);
        assert_eq!(ring.readable(), 63);
        assert_eq!(ring.writable(), 1);
        assert_eq!(drain_all(&ring), input);
    }

    #[test]
    fn exactly_capacity_laps_to_empty() {
        let ring = FrameRing::new(64).unwrap();
        let input: Vec<u32> = (0..64).collect();

        assert_eq!(ring.write(&input), 64);
        assert_eq!(ring.write_cursor(), 0);
        assert_eq!(ring.readable(), 0);
        assert_eq!(ring.writable(), 64);
    }

    #[test]
    fn availability_sums_to_capacity() {
        let ring = FrameRing::new(16).unwrap();
        for read in 0..16 {
            for write in 0..16 {
                assert_eq!(
                    ring.available_to_read(read, write) + ring.available_to_write(read, write),
                    16,
                    "read={read} write={write}"
                );
            }
        }
    }

    #[test]
    fn split_span_covers_wrap() {
        assert_eq!(split_span(0, 16, 16), (16, 0));
        assert_eq!(split_span(10, 4, 16), (4, 0));
        assert_eq!(split_span(12, 10, 16), (4, 6));
        assert_eq!(split_span(15, 1, 16), (1, 0));
    }

    #[test]
    fn straddling_write_wraps_to_head() {
        let ring = FrameRing::new(16).unwrap();
        ring.write(&[0; 12]);
        drain_all(&ring);

        let input: Vec<u32> = (100..110).collect();
        ring.write(&input);

        assert_eq!(ring.write_cursor(), (12 + 10) % 16);
        assert_eq!(drain_all(&ring), input);

        // Frames 4..10 of the batch landed at the start of storage.
        let mut head = [0u32; 6];
        ring.copy_out(0, &mut head);
        assert_eq!(head, [104, 105, 106, 107, 108, 109]);
    }

    #[test]
    fn oversized_write_keeps_trailing_capacity() {
        let ring = FrameRing::new(8).unwrap();
        ring.write(&[0; 3]);
        drain_all(&ring);

        let input: Vec<u32> = (0..13).collect();
        assert_eq!(ring.write(&input), 13);
        assert_eq!(ring.write_cursor(), (3 + 13) % 8);

        // A full lap looks empty to the consumer; the last 8 frames sit behind the cursor.
        let mut out = [0u32; 8];
        ring.copy_out(ring.write_cursor(), &mut out);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn empty_write_is_noop() {
        let ring = FrameRing::new(8).unwrap();
        assert_eq!(ring.write(&[]), 0);
        assert_eq!(ring.write_cursor(), 0);
    }
}
