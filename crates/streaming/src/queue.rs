use runtime::budget::FrameBudget;
use runtime::work_queue::{WorkId, WorkQueue, WorkQueueFull};

/// Handle for one tile fetch handed to the host.
///
/// Small and copyable so it can travel through the work queue and back with
/// the host's completion callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Tile fetch queue with deterministic ordering and backpressure.
///
/// Priorities are squared tile distances from the viewport centre, so tiles
/// in the middle of the view are fetched first.
#[derive(Debug)]
pub struct TileLoadQueue {
    inner: WorkQueue<RequestId>,
}

impl TileLoadQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: WorkQueue::with_max_len(max_pending),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn try_submit(&mut self, priority: i32, req: RequestId) -> Result<WorkId, WorkQueueFull> {
        self.inner.try_push(priority, 1, req)
    }

    pub fn cancel(&mut self, id: WorkId) -> bool {
        self.inner.cancel(id).is_some()
    }

    pub fn pop_next_with_budget(&mut self, budget: &mut FrameBudget) -> Option<RequestId> {
        self.inner.pop_next_with_budget(budget).map(|(_, req)| req)
    }
}
