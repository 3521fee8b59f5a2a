//! Virtual ring buffer with direct access.
//!
//! A single-producer/single-consumer byte ring of `capacity` bytes backed by
//! `capacity + window` bytes of storage. The trailing `window` bytes mirror
//! the leading `window` bytes, so any read or write of up to `window` bytes
//! is a single contiguous slice even when it crosses the wrap point.
//!
//! `read`/`write` hand out the same region until the matching
//! `read_forward`/`write_forward` advances the cursor, giving zero-copy
//! access from both sides.

use std::cell::UnsafeCell;
use std::sync::{Arc, Mutex};

struct RingState {
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

struct RingShared {
    data: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    window: usize,
    state: Mutex<RingState>,
}

// Cursor state lives behind the mutex; the byte regions handed out never
// overlap between the unique producer and the unique consumer.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len
    }
}

/// Ring buffer constructor namespace.
pub struct Ring;

impl Ring {
    /// Open a ring of `capacity` bytes whose contiguous read/write windows
    /// are at most `window` bytes. Allocates `capacity + window` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` or `window` is zero or `window > capacity`.
    #[must_use]
    pub fn open(capacity: usize, window: usize) -> (RingWriter, RingReader) {
        assert!(capacity > 0 && window > 0 && window <= capacity);
        let shared = Arc::new(RingShared {
            data: UnsafeCell::new(vec![0u8; capacity + window].into_boxed_slice()),
            capacity,
            window,
            state: Mutex::new(RingState {
                read_pos: 0,
                write_pos: 0,
                len: 0,
            }),
        });
        (
            RingWriter {
                shared: Arc::clone(&shared),
            },
            RingReader { shared },
        )
    }
}

/// Producer half of a [`Ring`].
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// Current valid byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the ring holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous writable slice at the write cursor, up to
    /// `min(window, capacity - len)` bytes. Does not advance; repeated calls
    /// return the same region until [`write_forward`](Self::write_forward).
    pub fn write(&mut self) -> &mut [u8] {
        let (pos, avail) = {
            let state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                state.write_pos,
                self.shared.window.min(self.shared.capacity - state.len),
            )
        };
        // The slice may extend into the trailing mirror; storage is
        // capacity + window bytes so pos + avail is always in bounds.
        unsafe {
            let data = &mut *self.shared.data.get();
            &mut data[pos..pos + avail]
        }
    }

    /// Commit up to `min(n, capacity - len)` bytes written into the region
    /// returned by [`write`](Self::write). Mirror copies happen before the
    /// length update, so a reader never observes uncommitted bytes.
    pub fn write_forward(&mut self, n: usize) -> usize {
        let capacity = self.shared.capacity;
        let window = self.shared.window;

        let (write_pos, n) = {
            let state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (state.write_pos, n.min(capacity - state.len))
        };
        if n == 0 {
            return 0;
        }

        unsafe {
            let data = &mut *self.shared.data.get();
            if write_pos + n > capacity {
                // The write spilled into the trailing mirror; replicate the
                // overflow at the head so wrapped cursors see it.
                let spill = write_pos + n - capacity;
                data.copy_within(capacity..capacity + spill, 0);
            } else if write_pos < window {
                // The write landed inside the leading window; replicate it
                // into the trailing mirror so a contiguous read crossing the
                // wrap point stays valid.
                let m = n.min(window - write_pos);
                data.copy_within(write_pos..write_pos + m, capacity + write_pos);
            }
        }

        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.write_pos += n;
        if state.write_pos >= capacity {
            state.write_pos -= capacity;
        }
        state.len += n;
        n
    }

    /// Copy `buf` into the ring, committing as it goes. Returns bytes
    /// accepted (saturates when full).
    pub fn push(&mut self, mut buf: &[u8]) -> usize {
        let mut total = 0;
        while !buf.is_empty() {
            let dst = self.write();
            if dst.is_empty() {
                break;
            }
            let n = dst.len().min(buf.len());
            dst[..n].copy_from_slice(&buf[..n]);
            self.write_forward(n);
            buf = &buf[n..];
            total += n;
        }
        total
    }
}

/// Consumer half of a [`Ring`].
pub struct RingReader {
    shared: Arc<RingShared>,
}

impl RingReader {
    /// Current valid byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the ring holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous readable slice of up to `min(len, window, available -
    /// offset)` bytes starting `offset` bytes into the readable region.
    /// Does not advance; repeated calls with the same offset return the
    /// same bytes. `len == 0` requests the full window.
    pub fn read(&mut self, len: usize, offset: usize) -> &[u8] {
        let window = self.shared.window;
        let capacity = self.shared.capacity;
        let want = if len == 0 || len > window { window } else { len };

        let (start, avail) = {
            let state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if offset >= state.len {
                return &[];
            }
            let mut start = state.read_pos + offset;
            if start >= capacity {
                start -= capacity;
            }
            (start, want.min(state.len - offset))
        };

        unsafe {
            let data = &*self.shared.data.get();
            &data[start..start + avail]
        }
    }

    /// Advance the read cursor by `min(n, len)` bytes; returns the advance.
    pub fn read_forward(&mut self, n: usize) -> usize {
        let capacity = self.shared.capacity;
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let n = n.min(state.len);
        if n == 0 {
            return 0;
        }
        state.read_pos += n;
        if state.read_pos >= capacity {
            state.read_pos -= capacity;
        }
        state.len -= n;
        n
    }

    /// Copy up to `out.len()` bytes out of the ring, advancing the cursor.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let mut total = 0;
        while total < out.len() {
            let src = self.read(out.len() - total, 0);
            if src.is_empty() {
                break;
            }
            let n = src.len();
            out[total..total + n].copy_from_slice(src);
            self.read_forward(n);
            total += n;
        }
        total
    }
}
