//! Per-thread write cursors over an installed buffer.
//!
//! Every installed buffer is a [`Generation`]: the mapping, the write position shared by all
//! writers of that mapping, and a table of slots. Each writer thread owns one slot, keyed by its
//! `ThreadId`, holding its cursor into the mapping. A reconfiguration installs a new generation
//! with an empty table, so the slots of threads that have exited go away with the buffer they
//! wrote to.
//!
//! The table is an append-only, lock-free list. Slots are never removed while the generation
//! lives, so a slot stays valid for as long as someone holds the generation. A slot is claimed
//! through its `busy` flag for the duration of one stream.
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::buffer::BufferHandle;
use crate::position::WritePosition;

/// An installed buffer and the writers that used it.
pub(crate) struct Generation {
    handle: BufferHandle,
    position: WritePosition,
    views: ViewTable,
}

struct ViewTable {
    head: AtomicPtr<Slot>,
}

struct Slot {
    owner: ThreadId,
    busy: AtomicBool,
    cursor: UnsafeCell<usize>,
    /// Immutable once the slot is published.
    next: *mut Slot,
}

/// Exclusive access to the calling thread's slot in one generation.
pub(crate) struct SlotGuard {
    slot: NonNull<Slot>,
    generation: Arc<Generation>,
}

impl Generation {
    pub(crate) fn new(handle: BufferHandle) -> Self {
        Generation {
            handle,
            position: WritePosition::new(),
            views: ViewTable::new(),
        }
    }

    pub(crate) fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    pub(crate) fn position(&self) -> &WritePosition {
        &self.position
    }

    /// Number of threads that wrote into this generation.
    pub(crate) fn writers(&self) -> usize {
        self.views.len()
    }

    /// Claim the calling thread's slot, creating it on first use.
    ///
    /// Returns `None` while a stream of this same thread is still alive.
    pub(crate) fn acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let slot = self.views.slot_for(thread::current().id());

        slot.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;

        Some(SlotGuard {
            slot: NonNull::from(slot),
            generation: Arc::clone(self),
        })
    }
}

impl ViewTable {
    const fn new() -> Self {
        ViewTable {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.load(Ordering::Acquire);

        // Safety: published slots live as long as the table.
        while let Some(slot) = unsafe { cursor.as_ref() } {
            count += 1;
            cursor = slot.next;
        }

        count
    }

    fn slot_for(&self, owner: ThreadId) -> &Slot {
        let mut head = self.head.load(Ordering::Acquire);

        if let Some(slot) = Self::find(head, owner) {
            return slot;
        }

        // Only the owner ever inserts its own slot, so after losing a race on `head` there is
        // still no slot for `owner` and we just retry the push.
        let slot = Box::into_raw(Box::new(Slot {
            owner,
            busy: AtomicBool::new(false),
            cursor: UnsafeCell::new(0),
            next: head,
        }));

        loop {
            match self
                .head
                .compare_exchange_weak(head, slot, Ordering::AcqRel, Ordering::Acquire)
            {
                // Safety: published and never freed before the table.
                Ok(_) => return unsafe { &*slot },
                Err(actual) => {
                    head = actual;
                    // Safety: not yet published, we are the only one with access.
                    unsafe { (*slot).next = actual };
                }
            }
        }
    }

    fn find<'table>(mut cursor: *mut Slot, owner: ThreadId) -> Option<&'table Slot> {
        // Safety: published slots live as long as the table.
        while let Some(slot) = unsafe { cursor.as_ref() } {
            if slot.owner == owner {
                return Some(slot);
            }

            cursor = slot.next;
        }

        None
    }
}

impl Drop for ViewTable {
    fn drop(&mut self) {
        let mut cursor = core::mem::replace(self.head.get_mut(), ptr::null_mut());

        while !cursor.is_null() {
            // Safety: every slot was created by `Box::into_raw` and is reachable exactly once.
            let slot = unsafe { Box::from_raw(cursor) };
            cursor = slot.next;
        }
    }
}

impl SlotGuard {
    pub(crate) fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    pub(crate) fn handle(&self) -> &BufferHandle {
        &self.generation.handle
    }

    pub(crate) fn capacity(&self) -> usize {
        self.generation.handle.capacity()
    }

    pub(crate) fn cursor(&self) -> usize {
        // Safety: we hold the `busy` flag.
        unsafe { *self.slot().cursor.get() }
    }

    /// Callers keep `cursor <= capacity`.
    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.capacity());
        // Safety: we hold the `busy` flag, and `&mut self` makes the access unique.
        unsafe { *self.slot().cursor.get() = cursor };
    }

    /// Copy as much of `data` as fits before the end of the file.
    pub(crate) fn write(&mut self, data: &[u8]) -> usize {
        let cursor = self.cursor();
        let Some(window) = self.generation.handle.bytes().get(cursor..) else {
            return 0;
        };

        let mut written = 0;
        for (cell, &byte) in window.iter().zip(data) {
            cell.store(byte, Ordering::Relaxed);
            written += 1;
        }

        self.set_cursor(cursor + written);
        written
    }

    fn slot(&self) -> &Slot {
        // Safety: the slot belongs to the table of `generation`, which we keep alive.
        unsafe { self.slot.as_ref() }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot().busy.store(false, Ordering::Release);
    }
}
