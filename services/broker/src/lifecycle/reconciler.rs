//! Per-resource status reconciliation.
//!
//! One task runs per physical resource undergoing a create or delete. It
//! polls the provider on a fixed interval, advances the persisted status,
//! and triggers side effects at terminal transitions. Tasks communicate
//! only through the registry; they terminate themselves at a terminal
//! status or an unrecoverable provider error and are never cancelled from
//! outside.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mdsb_id::ResourceId;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::Catalog;
use crate::db::{DbError, Registry};
use crate::gateway::{ProviderGateway, ResourceDescription};
use crate::model::{ClaimFilter, ClaimRecord, ClaimStatus, ResourceRecord, ResourceStatus};

use super::params::ProvisionParams;
use super::roles;
use super::tags::{self, TagContext};

/// Which operation a reconciler drives for its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
}

enum Step {
    Continue,
    Done,
}

/// The poll loop for a single resource.
pub struct Reconciler {
    registry: Arc<dyn Registry>,
    gateway: Arc<dyn ProviderGateway>,
    catalog: Arc<Catalog>,
    foundation: String,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn Registry>,
        gateway: Arc<dyn ProviderGateway>,
        catalog: Arc<Catalog>,
        foundation: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            catalog,
            foundation,
            poll_interval,
        }
    }

    /// Drive the resource's operation until a terminal status is reached.
    #[instrument(skip(self), fields(resource_id = %resource_id, operation = ?operation))]
    pub async fn run(&self, resource_id: ResourceId, operation: Operation) {
        debug!("reconciler started");
        let mut interval = tokio::time::interval(self.poll_interval);
        // the first poll lands one full interval after the submit
        interval.tick().await;

        loop {
            interval.tick().await;

            let resource = match self.registry.get_resource(resource_id).await {
                Ok(Some(resource)) => resource,
                Ok(None) => {
                    warn!("resource row is gone; stopping reconciler");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "registry read failed; stopping reconciler");
                    break;
                }
            };

            let step = match operation {
                Operation::Create => self.poll_create(resource).await,
                Operation::Delete => self.poll_delete(resource).await,
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Done) => break,
                Err(e) => {
                    error!(error = %e, "registry write failed; stopping reconciler");
                    break;
                }
            }
        }
        debug!("reconciler finished");
    }

    async fn poll_create(&self, mut resource: ResourceRecord) -> Result<Step, DbError> {
        match self.gateway.describe(resource.kind, &resource.provider_id).await {
            Err(e) if e.is_not_found() => {
                // a resource must never vanish while its create is in flight
                let message = format!(
                    "backing data store {} disappeared during create: {}",
                    resource.provider_id, e.message
                );
                warn!(provider_id = %resource.provider_id, "{message}");
                self.fail_operation(resource, ResourceStatus::CreateFailed, &message)
                    .await?;
                Ok(Step::Done)
            }
            Err(e) => {
                let message = format!(
                    "failed to describe backing data store {}: {}",
                    resource.provider_id, e
                );
                warn!(provider_id = %resource.provider_id, "{message}");
                self.fail_operation(resource, ResourceStatus::NotFound, &message)
                    .await?;
                Ok(Step::Done)
            }
            Ok(description) if description.is_available() => {
                resource.endpoint_host = description.endpoint_host.clone();
                resource.endpoint_port = description.endpoint_port;

                if resource.kind.is_multi_node() && !description.all_nodes_available() {
                    self.report_members_pending(resource, &description).await?;
                    return Ok(Step::Continue);
                }

                self.finalize_create(resource).await?;
                Ok(Step::Done)
            }
            Ok(description) => {
                debug!(
                    provider_id = %resource.provider_id,
                    provider_status = %description.status,
                    "still creating"
                );
                resource.last_status_update = Utc::now();
                resource.last_message = format!(
                    "backing data store {}: {}",
                    resource.provider_id, description.status
                );
                self.registry.update_resource(&resource).await?;
                Ok(Step::Continue)
            }
        }
    }

    /// The control endpoint is up but member nodes are still starting;
    /// persist the endpoint and keep the create open.
    async fn report_members_pending(
        &self,
        mut resource: ResourceRecord,
        description: &ResourceDescription,
    ) -> Result<(), DbError> {
        let pending = description
            .nodes
            .iter()
            .filter(|n| !n.is_available())
            .count();
        debug!(
            provider_id = %resource.provider_id,
            pending_nodes = pending,
            "cluster ready, member nodes still starting"
        );
        resource.status = ResourceStatus::CreateInProgress;
        resource.last_status_update = Utc::now();
        resource.last_message = format!(
            "data store {} created, member node(s) creation in progress",
            resource.provider_id
        );
        self.registry.update_resource(&resource).await
    }

    async fn finalize_create(&self, mut resource: ResourceRecord) -> Result<(), DbError> {
        resource.status = ResourceStatus::CreateSucceeded;
        resource.last_status_update = Utc::now();
        resource.last_message = format!(
            "backing data store {} successfully created",
            resource.provider_id
        );
        self.registry.update_resource(&resource).await?;
        self.registry
            .set_claim_status_for_resource(resource.id, ClaimStatus::Succeeded)
            .await?;
        info!(
            resource_id = %resource.id,
            provider_id = %resource.provider_id,
            "create succeeded"
        );

        // side effects run strictly after readiness
        if let Some(claim) = self.local_claim(resource.id).await? {
            match ProvisionParams::from_raw(&claim.parameters) {
                Ok(params) => {
                    let tags = self.role_tags(&claim);
                    if let Err(e) =
                        roles::ensure_access_role(self.gateway.as_ref(), &resource, &params, tags)
                            .await
                    {
                        warn!(error = %e, "access role creation failed");
                        resource.last_message = format!(
                            "{}, access role creation failed ({})",
                            resource.last_message, e
                        );
                        self.registry.update_resource(&resource).await?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stored parameters unreadable; skipping access role")
                }
            }
        }
        Ok(())
    }

    async fn poll_delete(&self, mut resource: ResourceRecord) -> Result<Step, DbError> {
        match self.gateway.describe(resource.kind, &resource.provider_id).await {
            Err(e) if e.is_not_found() => {
                // not-found is the only success signal a delete gets
                info!(
                    resource_id = %resource.id,
                    provider_id = %resource.provider_id,
                    "backing data store is gone"
                );
                resource.status = ResourceStatus::DeleteSucceeded;
                resource.last_status_update = Utc::now();
                resource.last_message =
                    format!("backing data store {} is gone", resource.provider_id);
                self.registry.update_resource(&resource).await?;

                let local = self.local_claim(resource.id).await?;
                if let Some(claim) = &local {
                    self.registry.delete_claim(&claim.instance_id).await?;
                }

                if let Some(claim) = local {
                    if let Ok(params) = ProvisionParams::from_raw(&claim.parameters) {
                        if let Err(e) =
                            roles::remove_access_role(self.gateway.as_ref(), &resource, &params)
                                .await
                        {
                            warn!(error = %e, "access role delete failed");
                            resource.last_message = format!(
                                "{}, access role delete failed ({})",
                                resource.last_message, e
                            );
                            self.registry.update_resource(&resource).await?;
                        }
                    }
                }
                Ok(Step::Done)
            }
            Err(e) => {
                let message = format!(
                    "failed to describe backing data store {} during delete: {}",
                    resource.provider_id, e
                );
                warn!(provider_id = %resource.provider_id, "{message}");
                self.fail_operation(resource, ResourceStatus::DeleteFailed, &message)
                    .await?;
                Ok(Step::Done)
            }
            Ok(description) => {
                debug!(
                    provider_id = %resource.provider_id,
                    provider_status = %description.status,
                    "still deleting"
                );
                resource.last_status_update = Utc::now();
                resource.last_message = format!(
                    "backing data store {}: {}",
                    resource.provider_id, description.status
                );
                self.registry.update_resource(&resource).await?;
                Ok(Step::Continue)
            }
        }
    }

    /// Persist a terminal failure and fail the locally-owned claims.
    /// Claims from other foundations are advanced by their own brokers.
    async fn fail_operation(
        &self,
        mut resource: ResourceRecord,
        status: ResourceStatus,
        message: &str,
    ) -> Result<(), DbError> {
        resource.status = status;
        resource.last_status_update = Utc::now();
        resource.last_message = message.to_string();
        self.registry.update_resource(&resource).await?;

        let filter = ClaimFilter {
            resource_id: Some(resource.id),
            foundation: Some(self.foundation.clone()),
            ..Default::default()
        };
        for mut claim in self.registry.find_claims(&filter).await? {
            claim.status = ClaimStatus::Failed;
            self.registry.update_claim(&claim).await?;
        }
        Ok(())
    }

    async fn local_claim(&self, resource_id: ResourceId) -> Result<Option<ClaimRecord>, DbError> {
        let filter = ClaimFilter {
            resource_id: Some(resource_id),
            foundation: Some(self.foundation.clone()),
            ..Default::default()
        };
        let claims = self.registry.find_claims(&filter).await?;
        Ok(claims.into_iter().next())
    }

    fn role_tags(&self, claim: &ClaimRecord) -> Vec<crate::gateway::Tag> {
        let service = self.catalog.service(&claim.service_id);
        let service_name = service.map(|s| s.name.as_str()).unwrap_or_default();
        let plan_name = self
            .catalog
            .plan(&claim.service_id, &claim.plan_id)
            .map(|p| p.name.as_str())
            .unwrap_or_default();
        tags::resource_tags(&TagContext {
            claim,
            service_name,
            plan_name,
        })
    }
}
