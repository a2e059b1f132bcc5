use std::time::Duration;

use anyhow::{Context, Result};
use sheetforge_core::state::{CoordinatorState, Effects};

use crate::server::AppState;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The generic per-plan RPC shape: acquire the plan's lock, load its
/// durable state, apply a transition, persist it, release the lock, then
/// dispatch whatever the transition asked for (§4.1.1 steps 1-5). Dispatch
/// runs outside the lock — a crash between save and dispatch is recovered by
/// NATS message-id dedup on retry, not by holding the mutex longer.
pub async fn mutate_plan(
    state: &AppState,
    plan_id: &str,
    mutate: impl FnOnce(&mut CoordinatorState) -> Effects,
) -> Result<(CoordinatorState, Effects)> {
    let guard = state.registry.lock(plan_id).await;
    let mut plan = crate::db::load(&state.pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;
    let old_status = plan.status;
    let effects = mutate(&mut plan);
    crate::db::save(&state.pool, &plan, now_ms()).await?;
    drop(guard);

    crate::dispatch::apply_effects(
        &state.dispatcher,
        &state.emitter,
        &state.alarms,
        &plan,
        &effects,
        old_status,
        now_ms(),
    )
    .await?;

    Ok((plan, effects))
}

/// Arm (or re-arm) `plan_id`'s deadline alarm (§4.4.1) to fire `duration_ms`
/// from now. On fire, re-acquires the plan's lock and runs `mark_failed`
/// through the same `mutate_plan` path an explicit `markFailed` RPC would
/// take, so the two can never race into inconsistent final states.
pub async fn arm_plan_alarm(state: AppState, plan_id: String, duration_ms: i64) {
    let duration = Duration::from_millis(duration_ms.max(0) as u64);
    state
        .alarms
        .clone()
        .arm(&plan_id.clone(), duration, move || async move {
            let result = mutate_plan(&state, &plan_id, |plan| {
                plan.mark_failed("Processing timeout exceeded");
                Effects::default()
            })
            .await;
            if let Err(e) = result {
                tracing::error!(?e, plan_id = %plan_id, "alarm fire failed to mark plan failed");
            }
        })
        .await;
}

/// Deadline remaining for a plan created at `created_at` with `timeout_ms`,
/// clamped to zero so an already-expired deadline fires immediately instead
/// of negatively.
pub fn remaining_timeout_ms(plan: &CoordinatorState) -> i64 {
    let deadline = plan.created_at + plan.timeout_ms;
    (deadline - now_ms()).max(0)
}

/// Re-arm the deadline alarm for every plan still in flight. Run once at
/// coordinator startup: the in-process [`crate::alarm::AlarmRegistry`] holds
/// nothing durable, so without this a restart would silently orphan the
/// deadline for any plan that was mid-pipeline when the process exited.
pub async fn rearm_non_terminal_plans(state: &AppState) -> Result<()> {
    let plans = crate::db::list_non_terminal(&state.pool).await?;
    tracing::info!(count = plans.len(), "re-arming alarms for in-flight plans");
    for plan in plans {
        let remaining = remaining_timeout_ms(&plan);
        arm_plan_alarm(state.clone(), plan.tenant.plan_id.clone(), remaining).await;
    }
    Ok(())
}
