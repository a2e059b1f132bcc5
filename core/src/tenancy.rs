use serde::{Deserialize, Serialize};

/// The `(organizationId, projectId, planId)` triple carried by every job, blob
/// path, and event. The event log is partitioned by `organization_id` alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
    pub organization_id: String,
    pub project_id: String,
    pub plan_id: String,
}

impl TenantKey {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            plan_id: plan_id.into(),
        }
    }
}
