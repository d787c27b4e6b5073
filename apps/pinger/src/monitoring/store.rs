use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{MonitorError, MonitorResult};

use super::types::Target;

/// Canonical set of monitored targets, kept in insertion order
#[derive(Debug, Default)]
pub struct TargetStore {
    targets: Mutex<Vec<Target>>,
}

impl TargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Target>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new target; urls must be unique
    pub fn add(&self, target: Target) -> MonitorResult<()> {
        let mut targets = self.lock();
        if targets.iter().any(|t| t.url == target.url) {
            return Err(MonitorError::DuplicateTarget(target.url));
        }
        targets.push(target);
        Ok(())
    }

    /// Delete the target with `url` and hand it back
    pub fn remove(&self, url: &str) -> MonitorResult<Target> {
        let mut targets = self.lock();
        let index = targets
            .iter()
            .position(|t| t.url == url)
            .ok_or_else(|| MonitorError::NotFound(url.to_string()))?;
        Ok(targets.remove(index))
    }

    /// Record a new status for `url`.
    ///
    /// Returns `false` when the target is gone, which callers treat as a
    /// benign race with removal.
    pub fn update_status(&self, url: &str, status_code: u16) -> bool {
        let mut targets = self.lock();
        match targets.iter_mut().find(|t| t.url == url) {
            Some(target) => {
                target.last_status_code = status_code;
                true
            }
            None => false,
        }
    }

    pub fn status_of(&self, url: &str) -> Option<u16> {
        self.lock().iter().find(|t| t.url == url).map(|t| t.last_status_code)
    }

    pub fn get(&self, url: &str) -> Option<Target> {
        self.lock().iter().find(|t| t.url == url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().iter().any(|t| t.url == url)
    }

    /// Snapshot of all targets in insertion order
    pub fn list(&self) -> Vec<Target> {
        self.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().iter().map(|t| t.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
