//! Bounded lock-free single-producer/single-consumer ring buffer
//!
//! The ring has `capacity` slots and keeps one of them free to tell "full" from
//! "empty", so at most `capacity - 1` values are queued at once. The producer
//! only advances `write_index` after the slot is fully written and the consumer
//! only advances `read_index` after the slot is fully read; both publish with
//! release stores and observe the other side with acquire loads.
//!
//! Neither side ever blocks: a full ring hands the value back to the producer.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
}

// SAFETY: a slot is only touched by the producer while it lies outside
// [read_index, write_index) and only by the consumer while inside it; the
// acquire/release pair on the indices orders those accesses.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn len(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        (write + self.capacity() - read) % self.capacity()
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut read = *self.read_index.get_mut();
        let write = *self.write_index.get_mut();

        while read != write {
            // SAFETY: every slot in [read, write) holds an initialized value
            // that was never read out.
            unsafe { self.slots[read].get_mut().assume_init_drop() };
            read = (read + 1) % self.slots.len();
        }
    }
}

/// Writing half. There is exactly one per ring.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

/// Reading half. There is exactly one per ring.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

/// Creates a ring with `capacity` slots (at least two), holding up to `capacity - 1` values.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(2);
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(Ring {
        slots,
        read_index: AtomicUsize::new(0),
        write_index: AtomicUsize::new(0),
    });

    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    )
}

impl<T> Producer<T> {
    /// Enqueues `value`, or returns it untouched when the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let ring = &*self.ring;
        let write = ring.write_index.load(Ordering::Relaxed);
        let next = ring.next(write);

        if next == ring.read_index.load(Ordering::Acquire) {
            return Err(value);
        }

        // SAFETY: `write` is outside the consumer's readable range until the
        // release store below publishes it.
        unsafe { (*ring.slots[write].get()).write(value) };
        ring.write_index.store(next, Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots; one fewer values fit.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Consumer<T> {
    /// Dequeues the oldest value, if any.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let read = ring.read_index.load(Ordering::Relaxed);

        if read == ring.write_index.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the acquire load above makes the producer's write of this
        // slot visible, and the producer will not reuse it until the release
        // store below.
        let value = unsafe { (*ring.slots[read].get()).assume_init_read() };
        ring.read_index.store(ring.next(read), Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
