//! Synchronization primitives shared by the signal and data threads.
//!
//! Two primitives live here: the global [`StopFlag`] checked once per tick
//! on both threads, and the [`PauseBarrier`] implementing the two-phase
//! pause handshake that quiesces the data thread while a device-related
//! node reconfigures hardware.
//!
//! The handshake is deliberately an explicit state object rather than a
//! pair of ad hoc booleans:
//!
//! 1. the signal side *requests* a pause and blocks,
//! 2. the data side reaches its checkpoint, *acknowledges* (the signal side
//!    wakes with the data thread provably idle),
//! 3. the signal side reconfigures hardware,
//! 4. the signal side *resumes*, waking the data thread.
//!
//! No frame captured before the pause can be processed after it under new
//! configuration assumptions, because the data thread is parked inside its
//! checkpoint for the whole window.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Setting it aborts both programs at their next checkpoint; it is never
/// cleared for the lifetime of one acquisition.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: AtomicBool,
}

impl StopFlag {
    /// A flag in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort. Idempotent.
    pub fn set(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether an abort has been requested.
    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct PauseState {
    /// Signal side has asked the data thread to pause
    pause_requested: bool,
    /// Data thread is parked inside its checkpoint
    paused: bool,
    /// Data thread is still running its loop
    data_exited: bool,
}

/// Two-phase pause handshake between the signal and data threads.
pub struct PauseBarrier {
    state: Mutex<PauseState>,
    cv: Condvar,
}

impl Default for PauseBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseBarrier {
    /// A barrier with both sides running.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PauseState::default()),
            cv: Condvar::new(),
        }
    }

    /// Signal side: request a pause and block until the data thread has
    /// acknowledged it (or has exited).
    pub fn request_pause(&self) {
        let mut state = self.state.lock();
        state.pause_requested = true;
        self.cv.notify_all();
        while !state.paused && !state.data_exited {
            self.cv.wait(&mut state);
        }
    }

    /// Signal side: release the data thread. Safe to call when no pause is
    /// pending (cleanup hooks rely on this being idempotent).
    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.pause_requested = false;
        self.cv.notify_all();
    }

    /// Data side: honor a pending pause request, parking until resumed.
    ///
    /// Called once per data tick. Returns immediately when no pause is
    /// pending.
    pub fn checkpoint(&self) {
        let mut state = self.state.lock();
        if !state.pause_requested {
            return;
        }
        state.paused = true;
        self.cv.notify_all();
        while state.pause_requested {
            self.cv.wait(&mut state);
        }
        state.paused = false;
        self.cv.notify_all();
    }

    /// Data side: the loop is exiting; wake any requester so it never
    /// blocks on a thread that is gone.
    pub fn data_exited(&self) {
        let mut state = self.state.lock();
        state.data_exited = true;
        self.cv.notify_all();
    }

    /// Whether the data thread is currently parked in its checkpoint.
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }
}
