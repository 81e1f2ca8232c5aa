//! Ready queue
//!
//! Fixed-capacity circular queue of pids. Enqueueing into a full ring fails
//! (the scheduler drops the push silently, which admission control relies
//! on); removal compacts the ring preserving order.

use crate::process::Pid;

/// Capacity of the ready ring.
pub const READY_QUEUE_CAPACITY: usize = 256;

/// FIFO of processes eligible to run.
pub struct ReadyQueue {
    slots: [Option<Pid>; READY_QUEUE_CAPACITY],
    head: usize,
    tail: usize,
    count: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self { slots: [None; READY_QUEUE_CAPACITY], head: 0, tail: 0, count: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == READY_QUEUE_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Push to the tail. `false` when the ring is full.
    pub fn enqueue(&mut self, pid: Pid) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.tail] = Some(pid);
        self.tail = (self.tail + 1) % READY_QUEUE_CAPACITY;
        self.count += 1;
        true
    }

    /// Pop the head.
    pub fn dequeue(&mut self) -> Option<Pid> {
        if self.is_empty() {
            return None;
        }
        let pid = self.slots[self.head].take();
        self.head = (self.head + 1) % READY_QUEUE_CAPACITY;
        self.count -= 1;
        pid
    }

    /// Remove one occurrence of `pid`, compacting the ring. `false` when it
    /// was not queued.
    pub fn remove(&mut self, pid: Pid) -> bool {
        if self.is_empty() {
            return false;
        }

        let mut compacted = [None; READY_QUEUE_CAPACITY];
        let mut kept = 0;
        let mut found = false;

        let mut index = self.head;
        for _ in 0..self.count {
            if let Some(entry) = self.slots[index] {
                if entry == pid && !found {
                    found = true;
                } else {
                    compacted[kept] = Some(entry);
                    kept += 1;
                }
            }
            index = (index + 1) % READY_QUEUE_CAPACITY;
        }

        if found {
            self.slots = compacted;
            self.head = 0;
            self.tail = kept % READY_QUEUE_CAPACITY;
            self.count = kept;
        }
        found
    }

    pub fn contains(&self, pid: Pid) -> bool {
        let mut index = self.head;
        for _ in 0..self.count {
            if self.slots[index] == Some(pid) {
                return true;
            }
            index = (index + 1) % READY_QUEUE_CAPACITY;
        }
        false
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
