use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One cancellable timeout per in-flight plan (§4.4.1). `arm` is called
/// whenever a plan enters or re-enters a non-terminal status; `cancel`
/// whenever it reaches `complete`/`failed` through any other path, so the
/// sleeping task never outlives the plan it watches.
///
/// Every armed alarm is a child of the registry's root token, so a single
/// `shutdown()` call drains them all on process shutdown without waiting out
/// their full timeout.
#[derive(Clone)]
pub struct AlarmRegistry {
    root: CancellationToken,
    tokens: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    next_generation: Arc<AtomicU64>,
}

impl AlarmRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm a `duration`-long timeout for `plan_id`. If `on_fire` runs it is
    /// because the timeout elapsed without a prior `cancel` — the caller is
    /// responsible for re-checking the plan's status before acting, since the
    /// alarm itself holds no lock while sleeping.
    pub async fn arm<F, Fut>(&self, plan_id: &str, duration: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut tokens = self.tokens.lock().await;
            if let Some((_, old)) = tokens.insert(plan_id.to_string(), (generation, token.clone()))
            {
                old.cancel();
            }
        }
        let plan_id = plan_id.to_string();
        let tokens = self.tokens.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    on_fire().await;
                }
            }
            // Only remove the entry if it is still this task's own alarm: if the
            // plan was re-armed while we were sleeping/draining, the new alarm's
            // generation no longer matches ours and must not be deleted.
            let mut tokens = tokens.lock().await;
            if let Some((current_generation, _)) = tokens.get(&plan_id) {
                if *current_generation == generation {
                    tokens.remove(&plan_id);
                }
            }
        });
    }

    /// Cancel `plan_id`'s alarm, if any. No-op if it already fired or was
    /// never armed.
    pub async fn cancel(&self, plan_id: &str) {
        if let Some((_, token)) = self.tokens.lock().await.remove(plan_id) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn cancel_before_firing_suppresses_on_fire() {
        let registry = AlarmRegistry::new(CancellationToken::new());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        registry
            .arm("plan-a", Duration::from_millis(50), move || async move {
                fired_clone.store(true, Ordering::SeqCst);
            })
            .await;
        registry.cancel("plan-a").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn uncancelled_alarm_fires() {
        let registry = AlarmRegistry::new(CancellationToken::new());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        registry
            .arm("plan-a", Duration::from_millis(10), move || async move {
                fired_clone.store(true, Ordering::SeqCst);
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rearming_cancels_the_previous_alarm() {
        let registry = AlarmRegistry::new(CancellationToken::new());
        let first_fired = Arc::new(AtomicBool::new(false));
        let first_clone = first_fired.clone();
        registry
            .arm("plan-a", Duration::from_millis(20), move || async move {
                first_clone.store(true, Ordering::SeqCst);
            })
            .await;
        let second_fired = Arc::new(AtomicBool::new(false));
        let second_clone = second_fired.clone();
        registry
            .arm("plan-a", Duration::from_millis(200), move || async move {
                second_clone.store(true, Ordering::SeqCst);
            })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!first_fired.load(Ordering::SeqCst));
        assert!(!second_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stale_cleanup_does_not_delete_a_rearmed_alarm() {
        let registry = AlarmRegistry::new(CancellationToken::new());
        registry
            .arm("plan-a", Duration::from_millis(10), || async move {})
            .await;
        // Let the first alarm fire and its cleanup run before re-arming, so the
        // re-arm and the first task's post-select cleanup race for the same key.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second_fired = Arc::new(AtomicBool::new(false));
        let second_clone = second_fired.clone();
        registry
            .arm("plan-a", Duration::from_millis(200), move || async move {
                second_clone.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(
            registry.tokens.lock().await.contains_key("plan-a"),
            "re-armed alarm's registry entry must survive the first alarm's cleanup"
        );
        registry.cancel("plan-a").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second_fired.load(Ordering::SeqCst));
    }
}
