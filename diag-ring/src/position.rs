//! Lock-free reservation of write ranges in the ring.
use core::sync::atomic::{AtomicUsize, Ordering};

/// The cursor shared by all writers of one buffer: offset of its next unreserved byte.
pub(crate) struct WritePosition {
    next: AtomicUsize,
}

/// A range handed to one writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Reservation {
    /// Where the writer starts.
    pub begin: usize,
    /// Bytes from `begin` to the end of the file. Anything longer must be truncated or continued
    /// at offset 0 by the writer.
    pub available: usize,
}

impl WritePosition {
    pub(crate) const fn new() -> Self {
        WritePosition {
            next: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Reserve `byte_count` bytes of a ring with `capacity` bytes.
    ///
    /// Optimistic retry: read, compute the next position, compare-and-swap, and on contention
    /// start over with the value the winner left. The stored position always wraps into
    /// `[0, capacity)`, so a reservation reaching past the end leaves the next one to start at its
    /// wrapped-around end.
    pub(crate) fn reserve(&self, byte_count: usize, capacity: usize) -> Reservation {
        debug_assert!(capacity > 0);

        let mut observed = self.next.load(Ordering::Acquire);
        loop {
            // In bounds even if a caller shrinks `capacity`.
            let begin = observed % capacity;
            let room = capacity - begin;
            let end = if byte_count < room {
                begin + byte_count
            } else {
                (byte_count - room) % capacity
            };

            match self
                .next
                .compare_exchange_weak(observed, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Reservation {
                        begin,
                        available: room,
                    }
                }
                Err(actual) => observed = actual,
            }
        }
    }
}
