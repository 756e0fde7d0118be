//! Item queues used by the scheduler and as the engine's output queue.
//!
//! `MemoryQueue` is a lock-free FIFO built on `crossbeam`'s `SegQueue`; it is
//! safe for the downloader to push from its own tasks while the engine pops on
//! its tick. `StackQueue` is the LIFO alternative used when a scheduler is
//! configured to break priority ties newest-first.
//!
//! Both queues reject pushes after `close()` with `CrawlError::QueueClosed`.
//! Items already queued can still be popped.

use crate::error::CrawlError;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Contract shared by every queue in the engine.
pub trait Queue<T>: Send + Sync {
    /// Appends an item. Fails with `QueueClosed` once the queue is closed.
    fn push(&self, item: T) -> Result<(), CrawlError>;

    /// Removes the next item, or `None` when empty.
    fn pop(&self) -> Option<T>;

    fn len(&self) -> usize;

    /// Constant-time non-empty check.
    fn has_items(&self) -> bool {
        self.len() > 0
    }

    /// Forbids further pushes. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// FIFO queue.
pub struct MemoryQueue<T> {
    items: SegQueue<T>,
    closed: AtomicBool,
}

impl<T> MemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> for MemoryQueue<T> {
    fn push(&self, item: T) -> Result<(), CrawlError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CrawlError::QueueClosed);
        }
        self.items.push(item);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        self.items.pop()
    }

    #[inline]
    fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// LIFO queue.
pub struct StackQueue<T> {
    items: Mutex<Vec<T>>,
    closed: AtomicBool,
}

impl<T> StackQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> Default for StackQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> for StackQueue<T> {
    fn push(&self, item: T) -> Result<(), CrawlError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CrawlError::QueueClosed);
        }
        self.items.lock().push(item);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        self.items.lock().pop()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
