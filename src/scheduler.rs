//! # Scheduler Module
//!
//! Implements the priority scheduler holding requests that await a fetch.
//!
//! ## Overview
//!
//! The `PriorityScheduler` keeps one sub-queue per distinct priority value.
//! Sub-queues are created lazily, the first time an item with that priority is
//! pushed, by a factory supplied at construction. Popping always serves the
//! winning priority that still has items; within a priority the sub-queue's
//! own order applies (FIFO for `MemoryQueue`, LIFO for `StackQueue`).
//!
//! ## Key Responsibilities
//!
//! - **Priority Selection**: `PriorityOrder` decides whether the highest or the
//!   lowest priority value wins.
//! - **Tie Breaking**: the sub-queue factory decides the order of equal
//!   priorities; `TieBreak` picks between the two bundled queues.
//! - **Shutdown**: `close()` cascades to every sub-queue and rejects pushes
//!   into priorities that appear afterwards.
//!
//! Crawl strategies such as depth-first or breadth-first are expressed purely
//! through the priority a request is given, never by changing this component.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::queue::Queue;
//! use spider_engine::scheduler::{PriorityOrder, PriorityScheduler, TieBreak};
//!
//! let scheduler = PriorityScheduler::with_policy(PriorityOrder::HighestFirst, TieBreak::Fifo);
//! scheduler.push(Request::parse("https://example.com")?.with_priority(5))?;
//! let next = scheduler.pop();
//! ```

use crate::error::CrawlError;
use crate::queue::{MemoryQueue, Queue, StackQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Items that can be scheduled by priority.
pub trait Prioritized {
    type Priority: Ord + Clone + Debug + Send + Sync + 'static;

    fn priority(&self) -> Self::Priority;
}

/// Which end of the priority range is served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    #[default]
    HighestFirst,
    LowestFirst,
}

/// Order of items sharing a priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Fifo,
    Lifo,
}

/// Builds the sub-queue for a newly seen priority.
pub type QueueFactory<T> =
    Box<dyn Fn(&<T as Prioritized>::Priority) -> Box<dyn Queue<T>> + Send + Sync>;

pub struct PriorityScheduler<T: Prioritized> {
    queues: Mutex<BTreeMap<T::Priority, Box<dyn Queue<T>>>>,
    factory: QueueFactory<T>,
    order: PriorityOrder,
    closed: AtomicBool,
}

impl<T> PriorityScheduler<T>
where
    T: Prioritized + Send + 'static,
{
    /// Creates a scheduler whose sub-queues come from `factory`.
    pub fn new(order: PriorityOrder, factory: QueueFactory<T>) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            factory,
            order,
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a scheduler using the bundled queue for `tie_break`.
    pub fn with_policy(order: PriorityOrder, tie_break: TieBreak) -> Self {
        let factory: QueueFactory<T> = match tie_break {
            TieBreak::Fifo => Box::new(|_| Box::new(MemoryQueue::new())),
            TieBreak::Lifo => Box::new(|_| Box::new(StackQueue::new())),
        };
        Self::new(order, factory)
    }

    pub fn order(&self) -> PriorityOrder {
        self.order
    }

    /// Number of distinct priorities seen so far.
    pub fn tiers(&self) -> usize {
        self.queues.lock().len()
    }
}

impl<T> Queue<T> for PriorityScheduler<T>
where
    T: Prioritized + Send + 'static,
{
    fn push(&self, item: T) -> Result<(), CrawlError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CrawlError::QueueClosed);
        }
        let priority = item.priority();
        let mut queues = self.queues.lock();
        let queue = queues.entry(priority.clone()).or_insert_with(|| {
            debug!("Creating scheduler queue for priority {:?}", priority);
            (self.factory)(&priority)
        });
        trace!("Scheduling item at priority {:?}", priority);
        queue.push(item)
    }

    fn pop(&self) -> Option<T> {
        let queues = self.queues.lock();
        match self.order {
            PriorityOrder::HighestFirst => queues.values().rev().find_map(|queue| queue.pop()),
            PriorityOrder::LowestFirst => queues.values().find_map(|queue| queue.pop()),
        }
    }

    fn len(&self) -> usize {
        self.queues.lock().values().map(|queue| queue.len()).sum()
    }

    fn has_items(&self) -> bool {
        self.queues.lock().values().any(|queue| queue.has_items())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            trace!("Scheduler already closed");
            return;
        }
        for queue in self.queues.lock().values() {
            queue.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
