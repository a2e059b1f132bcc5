use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One addressable, single-writer lock per `planId`. Concurrent calls with the
/// same `planId` serialize on the same `Arc<Mutex<()>>`; calls for different
/// `planId`s never share a lock and proceed independently.
///
/// This is the in-process half of the durability story; [`crate::db`] provides
/// the transactional-upsert half so state also survives a coordinator restart.
#[derive(Clone, Default)]
pub struct PlanRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `plan_id`, creating its entry if this is the first
    /// caller. The returned guard must be held for the duration of the
    /// load-transition-save sequence.
    pub async fn lock(&self, plan_id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(plan_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn different_plans_do_not_contend() {
        let registry = PlanRegistry::new();
        let a = registry.lock("plan-a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), registry.lock("plan-b")).await;
        assert!(b.is_ok());
        drop(a);
    }

    #[tokio::test]
    async fn same_plan_serializes() {
        let registry = PlanRegistry::new();
        let guard = registry.lock("plan-a").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), registry.lock("plan-a")).await;
        assert!(blocked.is_err());
        drop(guard);
    }
}
