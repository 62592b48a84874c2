use std::collections::BTreeMap;

use crate::residency::ResidencyState;

/// Identifies one tile texture: the tile source it came from and its URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub source: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryBudget {
    pub max_bytes: usize,
}

impl MemoryBudget {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    state: ResidencyState,
    bytes: usize,
    last_used_tick: u64,
    pin_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    BudgetExceeded { requested: usize, max: usize },
    NoEvictableEntries,
    UnknownKey,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::BudgetExceeded { requested, max } => {
                write!(f, "texture too large for budget: requested={requested} max={max}")
            }
            CacheError::NoEvictableEntries => write!(f, "no evictable textures (all pinned?)"),
            CacheError::UnknownKey => write!(f, "unknown texture key"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Texture cache with explicit residency and a byte budget.
///
/// Textures shown by a tile slot are pinned and never evicted. Unpinned
/// resident textures are evicted least-recently-used first, ties broken by
/// key order.
#[derive(Debug)]
pub struct TextureCache {
    budget: MemoryBudget,
    used_bytes: usize,
    tick: u64,
    entries: BTreeMap<CacheKey, CacheEntry>,
}

impl TextureCache {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            used_bytes: 0,
            tick: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self, key: &CacheKey) -> Option<ResidencyState> {
        self.entries.get(key).map(|e| e.state)
    }

    pub fn is_loaded(&self, key: &CacheKey) -> bool {
        self.state(key).is_some_and(ResidencyState::is_loaded)
    }

    fn entry_mut(&mut self, key: &CacheKey) -> &mut CacheEntry {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            state: ResidencyState::Requested,
            bytes: 0,
            last_used_tick: tick,
            pin_count: 0,
        });
        entry.last_used_tick = tick;
        entry
    }

    /// Registers interest in a texture. Resident textures are only touched.
    ///
    /// Returns `true` if a fetch has to be issued for the key.
    pub fn request(&mut self, key: &CacheKey) -> bool {
        let entry = self.entry_mut(key);
        if entry.state.needs_fetch() {
            entry.state = ResidencyState::Requested;
        }
        entry.state == ResidencyState::Requested
    }

    pub fn set_state(&mut self, key: &CacheKey, state: ResidencyState) -> Result<(), CacheError> {
        let entry = self.entries.get_mut(key).ok_or(CacheError::UnknownKey)?;
        if entry.state == ResidencyState::Resident && state != ResidencyState::Resident {
            self.used_bytes = self.used_bytes.saturating_sub(entry.bytes);
            entry.bytes = 0;
        }
        entry.state = state;
        Ok(())
    }

    pub fn pin(&mut self, key: &CacheKey) -> Result<(), CacheError> {
        let entry = self.entries.get_mut(key).ok_or(CacheError::UnknownKey)?;
        entry.pin_count = entry.pin_count.saturating_add(1);
        Ok(())
    }

    pub fn unpin(&mut self, key: &CacheKey) -> Result<(), CacheError> {
        let entry = self.entries.get_mut(key).ok_or(CacheError::UnknownKey)?;
        entry.pin_count = entry.pin_count.saturating_sub(1);
        Ok(())
    }

    /// Records a loaded texture of `bytes` size and evicts as needed.
    ///
    /// Returns the keys evicted to make room.
    pub fn mark_resident(
        &mut self,
        key: &CacheKey,
        bytes: usize,
    ) -> Result<Vec<CacheKey>, CacheError> {
        if bytes > self.budget.max_bytes {
            return Err(CacheError::BudgetExceeded {
                requested: bytes,
                max: self.budget.max_bytes,
            });
        }

        let entry = self.entry_mut(key);
        let previous = if entry.state == ResidencyState::Resident {
            entry.bytes
        } else {
            0
        };
        entry.bytes = bytes;
        entry.state = ResidencyState::Resident;
        self.used_bytes = self.used_bytes.saturating_sub(previous) + bytes;

        self.evict_as_needed(key)
    }

    pub fn evict(&mut self, key: &CacheKey) -> Result<(), CacheError> {
        self.set_state(key, ResidencyState::Evicted)
    }

    /// Evicts every resident texture of a tile source, e.g. after the source's
    /// URL scheme changed.
    pub fn invalidate_source(&mut self, source: &str) -> Vec<CacheKey> {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(k, e)| k.source == source && e.state == ResidencyState::Resident)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            let _ = self.evict(key);
        }
        stale
    }

    fn evict_as_needed(&mut self, protected: &CacheKey) -> Result<Vec<CacheKey>, CacheError> {
        let mut evicted = Vec::new();
        while self.used_bytes > self.budget.max_bytes {
            let candidate = self
                .entries
                .iter()
                .filter(|(k, e)| {
                    e.state == ResidencyState::Resident && e.pin_count == 0 && *k != protected
                })
                .min_by(|(ka, ea), (kb, eb)| {
                    ea.last_used_tick
                        .cmp(&eb.last_used_tick)
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(k, _)| k.clone());

            let Some(key) = candidate else {
                return Err(CacheError::NoEvictableEntries);
            };
            self.evict(&key)?;
            evicted.push(key);
        }
        Ok(evicted)
    }
}
