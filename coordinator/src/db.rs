use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use sheetforge_core::CoordinatorState;

/// Initialize the schema backing per-plan durable state. One row per plan,
/// keyed by the plan id; state is stored as JSONB and read back whole.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS coordinator_state (
                plan_id TEXT PRIMARY KEY,
                state JSONB NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create coordinator_state table")?;

    tracing::info!("coordinator schema initialized");
    Ok(())
}

pub async fn load(pool: &Pool, plan_id: &str) -> Result<Option<CoordinatorState>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            "SELECT state FROM coordinator_state WHERE plan_id = $1",
            &[&plan_id],
        )
        .await
        .context("failed to select coordinator state")?;

    match row {
        None => Ok(None),
        Some(row) => {
            let value: serde_json::Value = row.get(0);
            let state = serde_json::from_value(value).context("failed to deserialize state")?;
            Ok(Some(state))
        }
    }
}

/// Persist `state` unconditionally, racing only against whatever lock the
/// caller already holds (the registry's per-plan mutex).
pub async fn save(pool: &Pool, state: &CoordinatorState, now_ms: i64) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    let value = serde_json::to_value(state).context("failed to serialize state")?;

    client
        .execute(
            r#"
            INSERT INTO coordinator_state (plan_id, state, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (plan_id) DO UPDATE SET state = $2, updated_at = $3
            "#,
            &[&state.tenant.plan_id, &value, &now_ms],
        )
        .await
        .context("failed to upsert coordinator state")?;

    Ok(())
}

/// All plans not yet in a terminal status, used on coordinator startup to
/// re-arm the timeout alarm for every plan still in flight (§4.4.1) — the
/// in-process [`crate::alarm::AlarmRegistry`] holds nothing durable, so a
/// restart would otherwise orphan any plan that times out while no alarm is
/// armed for it.
pub async fn list_non_terminal(pool: &Pool) -> Result<Vec<CoordinatorState>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            "SELECT state FROM coordinator_state WHERE state->>'status' NOT IN ('complete', 'failed')",
            &[],
        )
        .await
        .context("failed to select non-terminal coordinator state")?;

    rows.into_iter()
        .map(|row| {
            let value: serde_json::Value = row.get(0);
            serde_json::from_value(value).context("failed to deserialize state")
        })
        .collect()
}

/// Load-or-create under a row lock: the transaction guarantees that a
/// concurrent `initialize` on a different coordinator replica either
/// observes the row this call is about to insert, or blocks until it commits.
pub async fn load_or_create(
    pool: &Pool,
    plan_id: &str,
    create: impl FnOnce() -> CoordinatorState,
    now_ms: i64,
) -> Result<CoordinatorState> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to start transaction")?;

    let row = tx
        .query_opt(
            "SELECT state FROM coordinator_state WHERE plan_id = $1 FOR UPDATE",
            &[&plan_id],
        )
        .await
        .context("failed to select coordinator state")?;

    let state = match row {
        Some(row) => {
            let value: serde_json::Value = row.get(0);
            serde_json::from_value(value).context("failed to deserialize state")?
        }
        None => {
            let state = create();
            let value = serde_json::to_value(&state).context("failed to serialize state")?;
            tx.execute(
                r#"
                INSERT INTO coordinator_state (plan_id, state, updated_at)
                VALUES ($1, $2, $3)
                "#,
                &[&plan_id, &value, &now_ms],
            )
            .await
            .context("failed to insert coordinator state")?;
            state
        }
    };

    tx.commit().await.context("failed to commit transaction")?;
    Ok(state)
}
