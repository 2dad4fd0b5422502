//! Provisioning: submitting creates and teardowns to the provider.
//!
//! The create path validates sizing and class parameters, guards
//! restore-from-snapshot requests against cross-tenant hijacking, persists
//! initial state, and hands off to a reconciler. Provider rejections are
//! persisted as terminal statuses synchronously; no reconciler is started
//! for them.

use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{Plan, Service};
use crate::gateway::CreateResourceSpec;
use crate::model::{ClaimRecord, ClaimStatus, ResourceKind, ResourceRecord, ResourceStatus};

use super::params::ProvisionParams;
use super::reconciler::Operation;
use super::tags::{self, TagContext, TAG_ORGANIZATION, TAG_SPACE};
use super::{CreateOutcome, CreateRequest, DeleteOutcome, Lifecycle, LifecycleError};

/// Generated master password: prefixed, clamped to the provider limit.
fn generated_password() -> String {
    let mut password = format!("pw{}", Uuid::new_v4());
    password.truncate(40);
    password
}

impl Lifecycle {
    /// Create a brand-new physical resource for the request.
    pub(crate) async fn provision_new(
        &self,
        req: &CreateRequest,
        raw_parameters: &str,
        service: &Service,
        plan: &Plan,
        kind: ResourceKind,
    ) -> Result<CreateOutcome, LifecycleError> {
        // Pure configuration checks come first and leave no registry rows.
        let params = ProvisionParams::from_raw(raw_parameters)
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        let class = self.classes().class_for(kind, &plan.name).ok_or_else(|| {
            LifecycleError::Config(format!(
                "could not find database instance class for plan {}",
                plan.name
            ))
        })?;

        let engine = params.engine_for(kind);
        let mut resource = ResourceRecord::new(kind, engine.clone());
        resource.service_user = Some(ProvisionParams::username_for(&engine).to_string());
        resource.service_password = Some(generated_password());
        resource.database_name = match kind {
            ResourceKind::Relational => Some(params.database_name().to_string()),
            ResourceKind::Document => None,
        };
        resource.last_message = "no provisioning submitted yet".to_string();
        self.registry().insert_resource(&resource).await?;

        let mut claim = self.claim_for(req, raw_parameters, resource.id, ClaimStatus::InProgress);
        claim.id = self.registry().insert_claim(&claim).await?;

        // Restore guard: the snapshot must exist and belong to the requester.
        if let Some(snapshot_id) = &params.restore_from_snapshot {
            if let Err(message) = self.snapshot_authorized(kind, snapshot_id, &claim).await {
                warn!(instance_id = %claim.instance_id, snapshot_id = %snapshot_id, "{message}");
                self.registry()
                    .update_resource_status(
                        resource.id,
                        ResourceStatus::CreateFailed,
                        &format!("database creation failed, error: {message}"),
                    )
                    .await?;
                claim.status = ClaimStatus::Failed;
                self.registry().update_claim(&claim).await?;
                return Err(LifecycleError::Config(message));
            }
        }

        let spec = CreateResourceSpec {
            kind,
            provider_id: resource.provider_id.clone(),
            class: class.to_string(),
            engine,
            master_username: resource.service_user.clone().unwrap_or_default(),
            master_password: resource.service_password.clone().unwrap_or_default(),
            database_name: resource.database_name.clone(),
            allocated_storage_gb: params.allocated_storage_gb(),
            multi_zone: params.multi_zone,
            retention_days: params.retention_days(),
            auto_minor_version_upgrade: params.auto_minor_version_upgrade(),
            node_count: params.node_count(),
            restore_from_snapshot: params.restore_from_snapshot.clone(),
            tags: tags::resource_tags(&TagContext {
                claim: &claim,
                service_name: &service.name,
                plan_name: &plan.name,
            }),
        };

        if let Err(e) = self.gateway().create(&spec).await {
            warn!(
                provider_id = %resource.provider_id,
                error_kind = %e.kind,
                error = %e,
                "provider rejected the create"
            );
            self.registry().delete_claim(&claim.instance_id).await?;
            self.registry()
                .update_resource_status(
                    resource.id,
                    ResourceStatus::CreateFailed,
                    &e.to_string().replace('\n', " "),
                )
                .await?;
            return Err(e.into());
        }

        info!(
            resource_id = %resource.id,
            provider_id = %resource.provider_id,
            kind = %kind,
            "backing data store is being created"
        );
        self.registry()
            .update_resource_status(
                resource.id,
                ResourceStatus::CreateInProgress,
                &format!("backing data store {} is being created", resource.provider_id),
            )
            .await?;
        self.spawn_reconciler(resource.id, Operation::Create);

        Ok(CreateOutcome::Accepted {
            description: "creating service instance...".to_string(),
        })
    }

    /// Submit the actual deprovision for the last remaining claim.
    pub(crate) async fn submit_teardown(
        &self,
        mut claim: ClaimRecord,
        resource: ResourceRecord,
    ) -> Result<DeleteOutcome, LifecycleError> {
        let params = ProvisionParams::from_raw(&claim.parameters)
            .map_err(|e| LifecycleError::Config(e.to_string()))?;

        claim.status = ClaimStatus::InProgress;
        self.registry().update_claim(&claim).await?;
        self.registry()
            .update_resource_status(resource.id, ResourceStatus::DeleteInProgress, "delete in progress")
            .await?;

        let policy = params.final_snapshot_policy(&resource.provider_id);
        if let Err(e) = self
            .gateway()
            .delete(resource.kind, &resource.provider_id, &policy)
            .await
        {
            warn!(
                provider_id = %resource.provider_id,
                error_kind = %e.kind,
                error = %e,
                "provider rejected the delete"
            );
            claim.status = ClaimStatus::Failed;
            self.registry().update_claim(&claim).await?;
            self.registry()
                .update_resource_status(resource.id, ResourceStatus::DeleteFailed, &e.to_string())
                .await?;
            return Err(e.into());
        }

        info!(
            resource_id = %resource.id,
            provider_id = %resource.provider_id,
            "backing data store is being deleted"
        );
        self.spawn_reconciler(resource.id, Operation::Delete);

        Ok(DeleteOutcome::Accepted {
            description: format!("delete of {} in progress...", resource.provider_id),
        })
    }

    /// Whether the snapshot exists and carries the requester's tags.
    async fn snapshot_authorized(
        &self,
        kind: ResourceKind,
        snapshot_id: &str,
        claim: &ClaimRecord,
    ) -> Result<(), String> {
        let rejection = || {
            format!(
                "snapshot with identifier {snapshot_id} was not found or requestor is not authorized"
            )
        };
        match self.gateway().describe_snapshot(kind, snapshot_id).await {
            Ok(snapshot) => {
                let organization_matches =
                    snapshot.tag_value(TAG_ORGANIZATION) == Some(claim.organization.as_str());
                let space_matches = snapshot.tag_value(TAG_SPACE) == Some(claim.space.as_str());
                if organization_matches && space_matches {
                    Ok(())
                } else {
                    Err(rejection())
                }
            }
            Err(_) => Err(rejection()),
        }
    }
}
