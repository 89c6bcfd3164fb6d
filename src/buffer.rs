//! Pre-allocated frame ring buffer shared between the two worker threads.
//!
//! The buffer is a fixed ring of image slots; `frame_id % capacity` gives
//! the slot. It is single-writer (the signal thread fills a slot and then
//! publishes the id) and multi-reader (any number of data-side hooks may
//! read a published slot, none may mutate it).
//!
//! # Ordering
//!
//! A frame id becomes visible to the data thread only after the signal
//! thread has committed the slot contents *and* advanced the published
//! cursor past it. Both cursors live under one mutex, so publication acts
//! as a release and [`FrameBuffer::wait_for_frames`] as the matching
//! acquire.
//!
//! # Backpressure
//!
//! The data thread may lag behind the signal thread by up to the ring
//! capacity. [`FrameBuffer::wait_for_capacity`] stalls the producer when it
//! would lap an unconsumed slot (bounded buffer discipline).

use crate::config::StageParameters;
use parking_lot::{Condvar, Mutex, RwLock};
use std::time::Duration;

/// One captured image with its acquisition metadata.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    /// Frame id this slot currently holds
    pub frame_id: u64,
    /// Stage position at capture time
    pub position: StageParameters,
    /// Channel index at capture time
    pub channel: u32,
    /// Image payload, row-major
    pub pixels: Vec<f64>,
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl FrameSlot {
    fn blank(width: usize, height: usize) -> Self {
        Self {
            frame_id: u64::MAX,
            position: StageParameters::default(),
            channel: 0,
            pixels: vec![0.0; width * height],
            width,
            height,
        }
    }
}

#[derive(Debug, Default)]
struct Cursors {
    /// Next frame id to be allocated; ids below this are published
    published: u64,
    /// Frame ids below this have been consumed by the data thread
    consumed: u64,
    /// Producer has finished; no further publications will happen
    producer_done: bool,
}

/// Fixed-size ring of frame slots with publish/consume cursors.
pub struct FrameBuffer {
    slots: Vec<RwLock<FrameSlot>>,
    cursors: Mutex<Cursors>,
    published_cv: Condvar,
    consumed_cv: Condvar,
}

impl FrameBuffer {
    /// Pre-allocate a ring of `capacity` slots of `width`×`height` pixels.
    pub fn new(capacity: usize, width: usize, height: usize) -> Self {
        assert!(capacity > 0, "frame buffer capacity must be at least 1");
        let slots = (0..capacity)
            .map(|_| RwLock::new(FrameSlot::blank(width, height)))
            .collect();
        Self {
            slots,
            cursors: Mutex::new(Cursors::default()),
            published_cv: Condvar::new(),
            consumed_cv: Condvar::new(),
        }
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The frame id the producer will publish next.
    pub fn next_frame_id(&self) -> u64 {
        self.cursors.lock().published
    }

    /// Producer path: fill the slot for `frame_id` before publication.
    ///
    /// Must only be called by the signal thread, and only for the id it is
    /// about to publish.
    pub fn write_slot<R>(&self, frame_id: u64, f: impl FnOnce(&mut FrameSlot) -> R) -> R {
        let index = (frame_id % self.slots.len() as u64) as usize;
        let mut slot = self.slots[index].write();
        slot.frame_id = frame_id;
        f(&mut slot)
    }

    /// Reader path: inspect a published slot.
    ///
    /// Returns `None` if the slot has since been recycled for a newer frame.
    pub fn with_frame<R>(&self, frame_id: u64, f: impl FnOnce(&FrameSlot) -> R) -> Option<R> {
        let index = (frame_id % self.slots.len() as u64) as usize;
        let slot = self.slots[index].read();
        if slot.frame_id == frame_id {
            Some(f(&slot))
        } else {
            None
        }
    }

    /// Stage position stashed with a published frame.
    pub fn position(&self, frame_id: u64) -> Option<StageParameters> {
        self.with_frame(frame_id, |slot| slot.position)
    }

    /// Publish `frame_id`, making it visible to the data thread.
    ///
    /// Ids must be published in order; publication of id `n` sets the
    /// cursor to `n + 1`.
    pub fn publish(&self, frame_id: u64) {
        let mut cursors = self.cursors.lock();
        debug_assert_eq!(cursors.published, frame_id, "frame ids published out of order");
        cursors.published = frame_id + 1;
        self.published_cv.notify_all();
    }

    /// Producer-side stall: wait until publishing `frame_id` would not lap
    /// an unconsumed slot.
    ///
    /// Returns `false` if `should_stop` turned true while waiting.
    pub fn wait_for_capacity(&self, frame_id: u64, should_stop: impl Fn() -> bool) -> bool {
        let capacity = self.slots.len() as u64;
        let mut cursors = self.cursors.lock();
        while frame_id.saturating_sub(cursors.consumed) >= capacity {
            if should_stop() {
                return false;
            }
            self.consumed_cv
                .wait_for(&mut cursors, Duration::from_millis(50));
        }
        true
    }

    /// Data-side tick: wait (bounded) for frames published after `seen`.
    ///
    /// Performs at most one timed wait and returns the ids now available;
    /// an empty vector means the wait timed out with nothing new.
    pub fn wait_for_frames(&self, seen: u64, timeout: Duration) -> Vec<u64> {
        let mut cursors = self.cursors.lock();
        if cursors.published <= seen && !cursors.producer_done {
            self.published_cv.wait_for(&mut cursors, timeout);
        }
        (seen..cursors.published).collect()
    }

    /// Mark every frame id below `upto` as consumed, releasing producer
    /// backpressure.
    pub fn mark_consumed(&self, upto: u64) {
        let mut cursors = self.cursors.lock();
        if upto > cursors.consumed {
            cursors.consumed = upto;
            self.consumed_cv.notify_all();
        }
    }

    /// Producer signals that no further frames will be published.
    pub fn finish(&self) {
        let mut cursors = self.cursors.lock();
        cursors.producer_done = true;
        self.published_cv.notify_all();
    }

    /// Whether the producer has finished publishing.
    pub fn is_finished(&self) -> bool {
        self.cursors.lock().producer_done
    }
}
