//! Lock-free single-producer/single-consumer ring buffer that overwrites
//! the oldest entry on overflow, used to carry received PD chunks from the
//! driver's interrupt context to the task.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A fixed-capacity, power-of-two-sized SPSC ring that never blocks the
/// producer: pushing into a full queue silently discards the oldest entry.
///
/// `head` is published with the odd/even convention from the reference
/// implementation: the producer toggles it to an odd value while writing a
/// slot and back to even once the slot is visible, so the consumer can
/// detect (by re-reading `head`) whether it raced a write, without a lock.
pub struct OverwriteQueue<T, const N: usize> {
    slots: UnsafeCell<[MaybeUninit<T>; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    version: AtomicU32,
}

// SAFETY: `slots` is written only by the single producer and read only by
// the single consumer, synchronized through `head`/`tail`.
unsafe impl<T: Send, const N: usize> Sync for OverwriteQueue<T, N> {}

impl<T: Copy, const N: usize> OverwriteQueue<T, N> {
    const ASSERT_POWER_OF_TWO: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    /// Create an empty queue.
    pub const fn new() -> Self {
        let _ = Self::ASSERT_POWER_OF_TWO;
        Self {
            slots: UnsafeCell::new([MaybeUninit::uninit(); N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            version: AtomicU32::new(0),
        }
    }

    const fn mask(index: usize) -> usize {
        index & (N - 1)
    }

    /// Producer: push a value, discarding the oldest entry if the queue is full.
    pub fn push(&self, value: T) {
        let head = self.head.load(Ordering::Relaxed);
        // Publish odd: a concurrent consumer must not trust this slot yet.
        self.head.store(head | 1, Ordering::Release);

        let slot = Self::mask(head >> 1);
        // SAFETY: single producer, slot index derived from our own head.
        unsafe {
            (*self.slots.get())[slot] = MaybeUninit::new(value);
        }

        let next_head = head.wrapping_add(2);
        self.head.store(next_head, Ordering::Release);

        let tail = self.tail.load(Ordering::Relaxed);
        let len = (next_head >> 1).wrapping_sub(tail >> 1);
        if len > N {
            // Overwrote the oldest unread entry: drop the consumer's tail
            // to the new oldest-still-present slot.
            self.tail.store(next_head.wrapping_sub(2 * N), Ordering::Release);
        }
    }

    /// Consumer: pop the oldest value, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head & 1 != 0 {
                // Producer mid-write; nothing new and stable to read yet.
                return None;
            }
            if (head >> 1) == (tail >> 1) {
                return None;
            }

            let slot = Self::mask(tail >> 1);
            // SAFETY: slot was published by the producer before advancing
            // `head` past it, observed via the Acquire load above.
            let value = unsafe { (*self.slots.get())[slot].assume_init() };

            // Re-check head: if the producer overwrote this slot while we
            // were reading it, retry rather than return a torn value.
            let head_after = self.head.load(Ordering::Acquire);
            if head_after.wrapping_sub(tail) > 2 * N as usize {
                continue;
            }

            self.tail.store(tail.wrapping_add(2), Ordering::Release);
            return Some(value);
        }
    }

    /// Producer: drop all queued entries and bump the version counter so
    /// the consumer can observe the clear without racing a concurrent pop.
    pub fn clear_from_producer(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.tail.store(head, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Consumer: drop all queued entries.
    pub fn clear_from_consumer(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// A counter bumped on every clear, letting the consumer detect a
    /// clear that happened between its own reads.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: Copy, const N: usize> Default for OverwriteQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_under_capacity() {
        let queue: OverwriteQueue<u32, 4> = OverwriteQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overwrites_oldest_on_overflow() {
        let queue: OverwriteQueue<u32, 4> = OverwriteQueue::new();
        for value in 0..10u32 {
            queue.push(value);
        }
        // Capacity 4: only the last four pushes (6,7,8,9) should survive.
        assert_eq!(queue.pop(), Some(6));
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), Some(8));
        assert_eq!(queue.pop(), Some(9));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn clear_from_producer_empties_queue_and_bumps_version() {
        let queue: OverwriteQueue<u32, 4> = OverwriteQueue::new();
        queue.push(1);
        queue.push(2);
        let before = queue.version();
        queue.clear_from_producer();
        assert_eq!(queue.pop(), None);
        assert!(queue.version() > before);
    }
}
