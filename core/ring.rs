//! The in-process frame ring buffer: a fixed-capacity, single-writer
//! multi-reader store of the most recent frames for one stream.
//!
//! Slot `frame_id % capacity`; the oldest frame in that slot is dropped and
//! `drops` incremented on overwrite.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::PixelFormat;

/// One captured frame: geometry plus owned pixel bytes.
#[derive(Clone, Debug)]
pub struct Frame {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub stride: u32,
    pub data: Arc<[u8]>,
}

#[derive(Clone)]
struct FrameSlot {
    frame: Option<Frame>,
}

/// Point-in-time occupancy/throughput counters for a `RingBuffer`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RingStats {
    pub capacity: usize,
    pub occupied: usize,
    pub pushed: u64,
    pub drops: u64,
}

/// A fixed-capacity ring of the most recent frames for one stream.
///
/// Single writer (the stream agent's ingest path calls `push`), multiple
/// readers (the exporter and any in-process consumer call `get_latest` /
/// `get_frame` / `get_all_frames`). The lock is held only while swapping a
/// slot's `Option<Frame>`, never while the frame bytes themselves are
/// copied — callers clone the `Arc<[u8]>`, not the underlying buffer.
pub struct RingBuffer {
    capacity: usize,
    slots: Mutex<Vec<FrameSlot>>,
    next_frame_id: std::sync::atomic::AtomicU64,
    pushed: std::sync::atomic::AtomicU64,
    drops: std::sync::atomic::AtomicU64,
    latest: std::sync::atomic::AtomicU64,
    has_latest: std::sync::atomic::AtomicBool,
}

impl RingBuffer {
    /// Creates a ring holding at most `capacity` frames. `capacity` must be
    /// at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        RingBuffer {
            capacity,
            slots: Mutex::new(vec![FrameSlot { frame: None }; capacity]),
            next_frame_id: std::sync::atomic::AtomicU64::new(0),
            pushed: std::sync::atomic::AtomicU64::new(0),
            drops: std::sync::atomic::AtomicU64::new(0),
            latest: std::sync::atomic::AtomicU64::new(0),
            has_latest: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Called from the single decode-path writer for this camera.
    /// Assigns the next monotonic `frame_id` (starting at 0), overwrites
    /// `slots[frame_id % capacity]` (counting a drop if that slot was
    /// occupied), and returns the assigned id. Never blocks on a reader:
    /// the lock below is held only to swap in the new slot, never while
    /// `data` itself is copied.
    pub fn push(
        &self,
        timestamp_ns: u64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        stride: u32,
        data: Arc<[u8]>,
    ) -> u64 {
        use std::sync::atomic::Ordering::Relaxed;
        let frame_id = self.next_frame_id.fetch_add(1, Relaxed);
        let frame = Frame { frame_id, timestamp_ns, width, height, pixel_format, stride, data };
        let idx = (frame_id as usize) % self.capacity;
        {
            let mut slots = self.slots.lock();
            if slots[idx].frame.is_some() {
                self.drops.fetch_add(1, Relaxed);
            }
            slots[idx] = FrameSlot { frame: Some(frame) };
        }
        self.pushed.fetch_add(1, Relaxed);
        self.latest.store(frame_id, Relaxed);
        self.has_latest.store(true, Relaxed);
        frame_id
    }

    /// The most recently pushed frame, if any.
    pub fn get_latest(&self) -> Option<Frame> {
        use std::sync::atomic::Ordering::Relaxed;
        if !self.has_latest.load(Relaxed) {
            return None;
        }
        self.get_frame(self.latest.load(Relaxed))
    }

    /// The frame with the given id, if it's still resident (i.e. hasn't
    /// been overwritten by a later frame landing in the same slot).
    pub fn get_frame(&self, frame_id: u64) -> Option<Frame> {
        let idx = (frame_id as usize) % self.capacity;
        let slots = self.slots.lock();
        match &slots[idx].frame {
            Some(f) if f.frame_id == frame_id => Some(f.clone()),
            _ => None,
        }
    }

    /// All currently resident frames, in slot order (not necessarily
    /// chronological for wrapped buffers).
    pub fn get_all_frames(&self) -> Vec<Frame> {
        self.slots
            .lock()
            .iter()
            .filter_map(|s| s.frame.clone())
            .collect()
    }

    /// Empties every slot. Counters are left intact.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for s in slots.iter_mut() {
            s.frame = None;
        }
        self.has_latest.store(false, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn stats(&self) -> RingStats {
        use std::sync::atomic::Ordering::Relaxed;
        let occupied = self.slots.lock().iter().filter(|s| s.frame.is_some()).count();
        RingStats {
            capacity: self.capacity,
            occupied,
            pushed: self.pushed.load(Relaxed),
            drops: self.drops.load(Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_dummy(ring: &RingBuffer, timestamp_ns: u64) -> u64 {
        ring.push(timestamp_ns, 2, 2, PixelFormat::Nv12, 2, Arc::from(vec![0u8; 6]))
    }

    #[test]
    fn push_assigns_monotonic_ids_from_zero() {
        let ring = RingBuffer::new(8);
        for expected in 0..5u64 {
            assert_eq!(push_dummy(&ring, expected), expected);
        }
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let ring = RingBuffer::new(3);
        for id in 0..5 {
            push_dummy(&ring, id);
        }
        let stats = ring.stats();
        assert_eq!(stats.occupied, 3);
        assert_eq!(stats.pushed, 5);
        assert_eq!(stats.drops, 2);
        assert_eq!(ring.get_latest().unwrap().frame_id, 4);
        // Slot 1 % 3 == 1 now holds frame 4, not frame 1.
        assert!(ring.get_frame(1).is_none());
        assert_eq!(ring.get_frame(4).unwrap().frame_id, 4);
        assert_eq!(ring.get_frame(3).unwrap().frame_id, 3);
    }

    #[test]
    fn empty_ring_has_no_latest() {
        let ring = RingBuffer::new(2);
        assert!(ring.get_latest().is_none());
        assert_eq!(ring.stats().occupied, 0);
    }

    #[test]
    fn clear_empties_slots_but_keeps_counters() {
        let ring = RingBuffer::new(2);
        push_dummy(&ring, 0);
        push_dummy(&ring, 1);
        ring.clear();
        assert!(ring.get_latest().is_none());
        assert_eq!(ring.stats().occupied, 0);
        assert_eq!(ring.stats().pushed, 2);
    }
}
