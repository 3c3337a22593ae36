//! Single-flight registry for on-demand region fetches.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::domain::region::Region;

/// Tracks regions with an acquisition pass currently in flight so a burst of
/// cache misses triggers at most one upstream fetch per region.
#[derive(Debug, Default)]
pub struct InFlightFetches {
    active: Arc<DashMap<String, ()>>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the fetch slot for a region. Returns `None` when another task
    /// already holds it; the returned guard releases the slot on drop.
    pub fn try_begin(&self, region: &Region) -> Option<InFlightGuard> {
        match self.active.entry(region.as_str().to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(InFlightGuard {
                    active: Arc::clone(&self.active),
                    region: region.as_str().to_string(),
                })
            }
        }
    }

    pub fn is_active(&self, region: &Region) -> bool {
        self.active.contains_key(region.as_str())
    }
}

/// Releases the region's fetch slot when dropped, including on panic or
/// cancellation of the owning task.
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<DashMap<String, ()>>,
    region: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.remove(&self.region);
    }
}
