//! Hand-off points between the tick loop and the host.
//!
//! The tick loop is single-threaded and must never block on the host. The
//! host (display server, shared memory writer, input sources) lives on
//! other threads. Exactly two structures cross that boundary:
//!
//! - [`FrameSlot`]: the latest completed frame. The machine swaps a whole
//!   frame in; readers take an `Arc` to a frame that is never written again.
//! - [`EventQueue`]: a bounded queue of host events. When it is full the
//!   oldest event is dropped so the queue can never grow without bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, RingBuffer};

/// One complete raster image, 0x00RRGGBB per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
    /// Slot generation this frame was published as (0 = never published).
    pub generation: u64,
}

impl Frame {
    /// A black frame of the given size.
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            generation: 0,
        }
    }

    /// Pixel at (x, y), or `None` outside the frame.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }
}

/// Double-buffered slot holding the most recently completed frame.
pub struct FrameSlot {
    current: Mutex<Arc<Frame>>,
    generation: AtomicU64,
    published: Condvar,
}

impl FrameSlot {
    /// Create a slot holding a blank frame at generation 0.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            current: Mutex::new(Arc::new(Frame::blank(width, height))),
            generation: AtomicU64::new(0),
            published: Condvar::new(),
        }
    }

    /// Swap in a completed frame and bump the generation.
    ///
    /// Returns the frame that was replaced so the producer can recycle its
    /// buffer when no reader still holds it.
    pub fn publish(&self, mut frame: Frame) -> Arc<Frame> {
        let mut current = self.lock();
        let generation = self.generation.load(Ordering::Relaxed) + 1;
        frame.generation = generation;
        let previous = std::mem::replace(&mut *current, Arc::new(frame));
        self.generation.store(generation, Ordering::Release);
        drop(current);
        self.published.notify_all();
        previous
    }

    /// The latest published frame. Never blocks on the producer for longer
    /// than a pointer swap.
    #[must_use]
    pub fn latest(&self) -> Arc<Frame> {
        Arc::clone(&self.lock())
    }

    /// Generation of the latest published frame.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Block until a frame newer than `seen` is published or `timeout`
    /// elapses. Returns the newer frame, if any.
    #[must_use]
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let guard = self.lock();
        let (guard, _) = self
            .published
            .wait_timeout_while(guard, timeout, |frame| frame.generation <= seen)
            .unwrap_or_else(PoisonError::into_inner);
        (guard.generation > seen).then(|| Arc::clone(&guard))
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Frame>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An input event from the host side, in host terms.
///
/// The machine translates these into the register-level effects the real
/// peripheral would produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Key press or release, identified by X11 keysym.
    Key { keysym: u32, pressed: bool },
    /// Absolute pointer position in frame pixels plus a button mask
    /// (bit 0 left, bit 1 middle, bit 2 right).
    Pointer { x: u16, y: u16, buttons: u8 },
    /// Byte arriving on the serial line.
    SerialByte(u8),
}

/// Bounded multi-producer queue that drops the oldest entry when full.
pub struct EventQueue<T> {
    ring: Mutex<HeapRb<T>>,
    dropped: AtomicU64,
}

impl<T> EventQueue<T> {
    /// Create a queue holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an event. Returns `true` if the oldest event was discarded
    /// to make room.
    pub fn push(&self, event: T) -> bool {
        let overwritten = self.lock().push_overwrite(event).is_some();
        if overwritten {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        overwritten
    }

    /// Remove the oldest event.
    pub fn pop(&self) -> Option<T> {
        self.lock().try_pop()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().occupied_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of queued events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity().get()
    }

    /// Total events discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HeapRb<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
