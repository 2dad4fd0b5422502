//! Startup recovery sweep.
//!
//! Reconciler tasks are in-memory and do not survive a restart, while their
//! persisted state does. At process start every locally-owned claim still
//! mid-operation gets its reconciler re-launched, exactly as if the
//! originating create or delete call had just returned.

use tracing::{info, warn};

use crate::db::DbError;
use crate::model::{ClaimFilter, ClaimStatus, ResourceStatus};

use super::reconciler::Operation;
use super::Lifecycle;

impl Lifecycle {
    /// Re-launch reconcilers for in-flight operations of this foundation.
    ///
    /// Returns the number of loops started. The supervisor suppresses
    /// duplicates, so claims sharing a resource resume exactly one loop.
    pub async fn resume_in_flight(&self) -> Result<usize, DbError> {
        let filter = ClaimFilter {
            foundation: Some(self.foundation().to_string()),
            status: Some(ClaimStatus::InProgress),
            ..Default::default()
        };
        let claims = self.registry().find_claims(&filter).await?;

        let mut resumed = 0;
        for claim in claims {
            let Some(resource) = self.registry().get_resource(claim.resource_id).await? else {
                warn!(
                    instance_id = %claim.instance_id,
                    resource_id = %claim.resource_id,
                    "in-progress claim references a missing resource; skipping"
                );
                continue;
            };

            let operation = match resource.status {
                ResourceStatus::Preparing | ResourceStatus::CreateInProgress => Operation::Create,
                ResourceStatus::DeleteInProgress => Operation::Delete,
                status => {
                    warn!(
                        instance_id = %claim.instance_id,
                        resource_id = %resource.id,
                        status = %status,
                        "in-progress claim on a resource with no running operation; skipping"
                    );
                    continue;
                }
            };

            if self.spawn_reconciler(resource.id, operation) {
                info!(
                    instance_id = %claim.instance_id,
                    resource_id = %resource.id,
                    operation = ?operation,
                    "resumed reconciliation after restart"
                );
                resumed += 1;
            }
        }
        Ok(resumed)
    }
}
