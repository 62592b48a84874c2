//! Deterministic priority queue for host-executed work.
//!
//! Key properties:
//! - Total ordering on `(priority, id)`; equal priorities pop in insertion order.
//! - Cancellation removes an item without perturbing the remaining order.
//! - Optional backpressure via a maximum pending length.
//! - Optional budgeting via abstract work units.

use std::collections::BTreeMap;

use crate::budget::FrameBudget;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkQueueFull {
    pub max_len: usize,
}

impl std::fmt::Display for WorkQueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue full (max {})", self.max_len)
    }
}

impl std::error::Error for WorkQueueFull {}

#[derive(Debug)]
struct Item<T> {
    payload: T,
    cost_units: u32,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    // Smaller priority values run earlier.
    items: BTreeMap<(i32, WorkId), Item<T>>,
    priorities: BTreeMap<WorkId, i32>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: BTreeMap::new(),
            priorities: BTreeMap::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, priority: i32, cost_units: u32, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.insert((priority, id), Item { payload, cost_units });
        self.priorities.insert(id, priority);
        id
    }

    pub fn try_push(
        &mut self,
        priority: i32,
        cost_units: u32,
        payload: T,
    ) -> Result<WorkId, WorkQueueFull> {
        if let Some(max_len) = self.max_len
            && self.len() >= max_len
        {
            return Err(WorkQueueFull { max_len });
        }
        Ok(self.push(priority, cost_units, payload))
    }

    /// Removes a pending item. Returns the payload if it was still queued.
    pub fn cancel(&mut self, id: WorkId) -> Option<T> {
        let priority = self.priorities.remove(&id)?;
        self.items.remove(&(priority, id)).map(|item| item.payload)
    }

    /// Cancels every pending item matching `pred`, returning their payloads
    /// in queue order.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let keys: Vec<(i32, WorkId)> = self
            .items
            .iter()
            .filter(|(_, item)| pred(&item.payload))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .filter_map(|k| {
                self.priorities.remove(&k.1);
                self.items.remove(&k).map(|item| item.payload)
            })
            .collect()
    }

    pub fn pop_next(&mut self) -> Option<(WorkId, T)> {
        let ((_, id), item) = self.items.pop_first()?;
        self.priorities.remove(&id);
        Some((id, item.payload))
    }

    /// Pops the next item only if the budget covers its cost.
    ///
    /// A too-expensive head item blocks the queue for this budget; cheaper
    /// items behind it are not promoted.
    pub fn pop_next_with_budget(&mut self, budget: &mut FrameBudget) -> Option<(WorkId, T)> {
        let (_, head) = self.items.first_key_value()?;
        if !budget.try_consume(head.cost_units) {
            return None;
        }
        self.pop_next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkId, &T)> {
        self.items.iter().map(|((_, id), item)| (*id, &item.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkQueue, WorkQueueFull};
    use crate::budget::FrameBudget;

    #[test]
    fn equal_priority_pops_in_insertion_order() {
        let mut q = WorkQueue::new();
        q.push(0, 1, "a");
        q.push(0, 1, "b");
        q.push(-1, 1, "first");
        let order: Vec<_> = std::iter::from_fn(|| q.pop_next().map(|(_, v)| v)).collect();
        assert_eq!(order, vec!["first", "a", "b"]);
    }

    #[test]
    fn cancel_returns_payload_once() {
        let mut q = WorkQueue::new();
        let a = q.push(0, 1, "a");
        q.push(0, 1, "b");
        assert_eq!(q.cancel(a), Some("a"));
        assert_eq!(q.cancel(a), None);
        assert_eq!(q.pop_next().map(|(_, v)| v), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn cancel_where_keeps_order_of_survivors() {
        let mut q = WorkQueue::new();
        for v in 0..6 {
            q.push(0, 1, v);
        }
        let dropped = q.cancel_where(|v| v % 2 == 0);
        assert_eq!(dropped, vec![0, 2, 4]);
        let rest: Vec<_> = q.iter().map(|(_, v)| *v).collect();
        assert_eq!(rest, vec![1, 3, 5]);
    }

    #[test]
    fn backpressure_rejects_when_full() {
        let mut q = WorkQueue::with_max_len(1);
        assert!(q.try_push(0, 1, "a").is_ok());
        assert_eq!(q.try_push(0, 1, "b").unwrap_err(), WorkQueueFull { max_len: 1 });
    }

    #[test]
    fn expensive_head_blocks_budget() {
        let mut q = WorkQueue::new();
        q.push(0, 2, "expensive");
        q.push(1, 1, "cheap");

        let mut budget = FrameBudget::new(1);
        assert!(q.pop_next_with_budget(&mut budget).is_none());
        assert_eq!(budget.remaining_units(), 1);
        assert_eq!(q.len(), 2);

        let mut budget = FrameBudget::new(3);
        assert_eq!(q.pop_next_with_budget(&mut budget).map(|(_, v)| v), Some("expensive"));
        assert_eq!(q.pop_next_with_budget(&mut budget).map(|(_, v)| v), Some("cheap"));
    }
}
