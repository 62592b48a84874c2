use std::collections::BTreeMap;

use runtime::budget::FrameBudget;
use runtime::work_queue::{WorkId, WorkQueueFull};

use crate::cache::{CacheError, CacheKey, MemoryBudget, TextureCache};
use crate::queue::{RequestId, TileLoadQueue};
use crate::residency::ResidencyState;

/// A fetch the host should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFetch {
    pub request: RequestId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// The texture is already resident.
    Cached,
    /// A fetch for this URL is already queued or in flight.
    Pending,
    Queued(RequestId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Resident { url: String, evicted: Vec<CacheKey> },
    /// The request was cancelled (or is unknown); its result is dropped.
    Discarded,
}

/// Tile loading for one tile source: texture cache + fetch queue.
///
/// Requests are explicitly cancelled when the tile they were issued for is no
/// longer wanted. Cancelled in-flight requests are reported through
/// [`LoadPipeline::take_cancelled`] so the host can abort them, and their
/// completions are discarded.
#[derive(Debug)]
pub struct LoadPipeline {
    namespace: String,
    cache: TextureCache,
    queue: TileLoadQueue,
    next_request: u64,
    queued: BTreeMap<String, (RequestId, WorkId)>,
    queued_urls: BTreeMap<RequestId, String>,
    in_flight: BTreeMap<RequestId, String>,
    cancelled: Vec<RequestId>,
}

impl LoadPipeline {
    pub fn new(namespace: impl Into<String>, budget: MemoryBudget, max_pending: usize) -> Self {
        Self {
            namespace: namespace.into(),
            cache: TextureCache::new(budget),
            queue: TileLoadQueue::new(max_pending),
            next_request: 1,
            queued: BTreeMap::new(),
            queued_urls: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, url: &str) -> CacheKey {
        CacheKey::new(self.namespace.clone(), url)
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.cache.is_loaded(&self.key(url))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn is_pending(&self, url: &str) -> bool {
        self.queued.contains_key(url) || self.in_flight.values().any(|u| u == url)
    }

    /// Requests the texture for `url`. Lower priorities are fetched first.
    pub fn submit(&mut self, url: &str, priority: i32) -> Result<Submitted, WorkQueueFull> {
        let key = self.key(url);
        if self.is_pending(url) {
            return Ok(Submitted::Pending);
        }
        if !self.cache.request(&key) {
            return Ok(if self.cache.is_loaded(&key) {
                Submitted::Cached
            } else {
                Submitted::Pending
            });
        }

        let req = RequestId(self.next_request);
        let work_id = self.queue.try_submit(priority, req)?;
        self.next_request += 1;
        self.queued.insert(url.to_string(), (req, work_id));
        self.queued_urls.insert(req, url.to_string());
        Ok(Submitted::Queued(req))
    }

    /// Cancels the queued or in-flight fetch for `url`, if any.
    pub fn cancel(&mut self, url: &str) -> bool {
        if let Some((req, work_id)) = self.queued.remove(url) {
            self.queued_urls.remove(&req);
            self.queue.cancel(work_id);
            return true;
        }

        let in_flight = self
            .in_flight
            .iter()
            .find(|(_, u)| u.as_str() == url)
            .map(|(req, _)| *req);
        if let Some(req) = in_flight {
            self.in_flight.remove(&req);
            self.cancelled.push(req);
            let key = self.key(url);
            let _ = self.cache.set_state(&key, ResidencyState::Requested);
            return true;
        }
        false
    }

    /// In-flight requests cancelled since the last call.
    pub fn take_cancelled(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.cancelled)
    }

    /// Releases queued fetches to the host, as far as the budget allows.
    pub fn next_fetches(&mut self, budget: &mut FrameBudget) -> Vec<TileFetch> {
        let mut out = Vec::new();
        while let Some(req) = self.queue.pop_next_with_budget(budget) {
            let Some(url) = self.queued_urls.remove(&req) else {
                continue;
            };
            self.queued.remove(&url);
            let key = self.key(&url);
            let _ = self.cache.set_state(&key, ResidencyState::Loading);
            self.in_flight.insert(req, url.clone());
            out.push(TileFetch { request: req, url });
        }
        out
    }

    pub fn complete(&mut self, req: RequestId, bytes: usize) -> Result<Completion, CacheError> {
        let Some(url) = self.in_flight.remove(&req) else {
            return Ok(Completion::Discarded);
        };
        let key = self.key(&url);
        let evicted = self.cache.mark_resident(&key, bytes)?;
        Ok(Completion::Resident { url, evicted })
    }

    /// Records a failed fetch. Returns the URL if the request was still live.
    pub fn fail(&mut self, req: RequestId) -> Option<String> {
        let url = self.in_flight.remove(&req)?;
        let key = self.key(&url);
        let _ = self.cache.set_state(&key, ResidencyState::Failed);
        Some(url)
    }

    pub fn pin(&mut self, url: &str) {
        let key = self.key(url);
        let _ = self.cache.pin(&key);
    }

    pub fn unpin(&mut self, url: &str) {
        let key = self.key(url);
        let _ = self.cache.unpin(&key);
    }
}
