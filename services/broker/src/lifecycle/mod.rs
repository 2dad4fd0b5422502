//! Resource lifecycle orchestration.
//!
//! The [`Lifecycle`] value is the front door the protocol surface calls:
//! it evaluates sharing decisions, drives provisioning and teardown against
//! the provider gateway, and supervises the background reconcilers that
//! converge persisted state by polling.

pub mod params;
pub mod provisioner;
pub mod reconciler;
pub mod recovery;
pub mod roles;
pub mod supervisor;
pub mod tags;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use mdsb_id::ResourceId;
use thiserror::Error;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::ClassTables;
use crate::db::{DbError, Registry};
use crate::gateway::{ProviderError, ProviderGateway};
use crate::model::{ClaimRecord, ClaimStatus};

use reconciler::{Operation, Reconciler};
use supervisor::ReconcilerSet;
use tracker::{CreateDecision, DeleteDecision};

/// Errors surfaced synchronously to the protocol layer.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Rejected before any provider call; the request itself must change.
    #[error("{0}")]
    Config(String),

    /// Clashes with existing shared state; retry later or change input.
    #[error("{0}")]
    Conflict(String),

    #[error("service instance {0} not found")]
    UnknownInstance(String),

    /// The provider rejected a submitted operation.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A create request as handed over by the protocol surface.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub organization: String,
    pub space: String,
    pub name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug)]
pub enum CreateOutcome {
    /// A create is running; completion is observed via status polling.
    Accepted { description: String },
    /// Attached to an already-successful resource; no provider call made.
    AlreadySucceeded { description: String },
}

#[derive(Debug)]
pub enum DeleteOutcome {
    /// A deprovision (or an attach to a running one) was accepted.
    Accepted { description: String },
    /// Only this claim was removed; the backing resource stays untouched.
    Dereferenced { description: String },
    /// The backing resource was already gone.
    AlreadyGone { description: String },
}

/// Current state of a logical instance, for status queries.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub service_id: String,
    pub plan_id: String,
    pub state: ClaimStatus,
    pub description: String,
}

/// Shared handles for every lifecycle path.
#[derive(Clone)]
pub struct Lifecycle {
    registry: Arc<dyn Registry>,
    gateway: Arc<dyn ProviderGateway>,
    catalog: Arc<Catalog>,
    classes: ClassTables,
    foundation: String,
    poll_interval: Duration,
    reconcilers: Arc<ReconcilerSet>,
}

impl Lifecycle {
    pub fn new(
        registry: Arc<dyn Registry>,
        gateway: Arc<dyn ProviderGateway>,
        catalog: Arc<Catalog>,
        classes: ClassTables,
        foundation: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            catalog,
            classes,
            foundation: foundation.into(),
            poll_interval,
            reconcilers: ReconcilerSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ProviderGateway> {
        &self.gateway
    }

    pub(crate) fn classes(&self) -> &ClassTables {
        &self.classes
    }

    pub(crate) fn foundation(&self) -> &str {
        &self.foundation
    }

    /// Number of reconciliation loops currently running in this process.
    pub fn active_reconcilers(&self) -> usize {
        self.reconcilers.active_count()
    }

    /// Handle a create request for a logical instance.
    pub async fn create_instance(
        &self,
        req: CreateRequest,
    ) -> Result<CreateOutcome, LifecycleError> {
        let raw_parameters = serde_json::to_string(&req.parameters)
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        if raw_parameters.len() > params::MAX_PARAMETERS_BYTES {
            return Err(LifecycleError::Config(format!(
                "the given parameter string is more than {} chars",
                params::MAX_PARAMETERS_BYTES
            )));
        }

        let service = self.catalog.service(&req.service_id).ok_or_else(|| {
            LifecycleError::Config(format!("service {} is not in the catalog", req.service_id))
        })?;
        let kind = service.kind().ok_or_else(|| {
            LifecycleError::Config(format!("service {} is not supported", service.name))
        })?;
        let plan = self.catalog.plan(&req.service_id, &req.plan_id).ok_or_else(|| {
            LifecycleError::Config(format!(
                "plan {} is not in the catalog for service {}",
                req.plan_id, service.name
            ))
        })?;

        let decision = tracker::decide_create(
            self.registry.as_ref(),
            &req.organization,
            &req.space,
            &req.name,
            &req.plan_id,
        )
        .await?;

        match decision {
            CreateDecision::Conflict(message) => Err(LifecycleError::Conflict(message)),
            CreateDecision::AttachSucceeded { resource } => {
                let claim =
                    self.claim_for(&req, &raw_parameters, resource.id, ClaimStatus::Succeeded);
                self.registry.insert_claim(&claim).await?;
                info!(
                    instance_id = %req.instance_id,
                    resource_id = %resource.id,
                    "attached to already-created resource"
                );
                Ok(CreateOutcome::AlreadySucceeded {
                    description: "database was created already".to_string(),
                })
            }
            CreateDecision::AttachInProgress {
                resource,
                from_foundation,
            } => {
                let claim =
                    self.claim_for(&req, &raw_parameters, resource.id, ClaimStatus::InProgress);
                self.registry.insert_claim(&claim).await?;
                info!(
                    instance_id = %req.instance_id,
                    resource_id = %resource.id,
                    from_foundation = %from_foundation,
                    "attached to in-progress create"
                );
                self.spawn_reconciler(resource.id, Operation::Create);
                Ok(CreateOutcome::Accepted {
                    description: format!(
                        "service instance create is in progress from foundation {from_foundation}..."
                    ),
                })
            }
            CreateDecision::ProvisionNew => {
                let service = service.clone();
                let plan = plan.clone();
                self.provision_new(&req, &raw_parameters, &service, &plan, kind)
                    .await
            }
        }
    }

    /// Handle a delete request for a logical instance.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<DeleteOutcome, LifecycleError> {
        let Some(mut claim) = self.registry.get_claim(instance_id).await? else {
            return Err(LifecycleError::UnknownInstance(instance_id.to_string()));
        };

        match tracker::decide_delete(self.registry.as_ref(), &claim).await? {
            DeleteDecision::CreateStillInProgress => Err(LifecycleError::Conflict(
                "there is still a create in progress (from another foundation)".to_string(),
            )),
            DeleteDecision::AttachDeleteInProgress { resource } => {
                claim.status = ClaimStatus::InProgress;
                self.registry.update_claim(&claim).await?;
                info!(
                    instance_id = %instance_id,
                    resource_id = %resource.id,
                    "attached to in-progress delete"
                );
                self.spawn_reconciler(resource.id, Operation::Delete);
                Ok(DeleteOutcome::Accepted {
                    description: "there is still a delete in progress (from another foundation)"
                        .to_string(),
                })
            }
            DeleteDecision::AlreadyGone => {
                self.registry.delete_claim(instance_id).await?;
                Ok(DeleteOutcome::AlreadyGone {
                    description: "the database was already deleted (from another foundation)"
                        .to_string(),
                })
            }
            DeleteDecision::Dereference { remaining } => {
                self.registry.delete_claim(instance_id).await?;
                info!(
                    instance_id = %instance_id,
                    remaining_references = remaining,
                    "claim removed, backing resource still in use"
                );
                Ok(DeleteOutcome::Dereferenced {
                    description:
                        "the physical database was not deleted (still in use by another foundation)"
                            .to_string(),
                })
            }
            DeleteDecision::Teardown { resource } => self.submit_teardown(claim, resource).await,
        }
    }

    /// Current state of a logical instance.
    pub async fn instance_status(&self, instance_id: &str) -> Result<InstanceStatus, LifecycleError> {
        let Some(claim) = self.registry.get_claim(instance_id).await? else {
            return Err(LifecycleError::UnknownInstance(instance_id.to_string()));
        };
        let description = self
            .registry
            .get_resource(claim.resource_id)
            .await?
            .map(|r| r.last_message)
            .unwrap_or_default();
        Ok(InstanceStatus {
            service_id: claim.service_id,
            plan_id: claim.plan_id,
            state: claim.status,
            description,
        })
    }

    pub(crate) fn claim_for(
        &self,
        req: &CreateRequest,
        raw_parameters: &str,
        resource_id: ResourceId,
        status: ClaimStatus,
    ) -> ClaimRecord {
        ClaimRecord {
            id: 0,
            instance_id: req.instance_id.clone(),
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone(),
            parameters: raw_parameters.to_string(),
            foundation: self.foundation.clone(),
            organization: req.organization.clone(),
            space: req.space.clone(),
            name: req.name.clone(),
            resource_id,
            status,
        }
    }

    /// Start a supervised reconciler; a no-op when one is already running.
    pub(crate) fn spawn_reconciler(&self, resource_id: ResourceId, operation: Operation) -> bool {
        let reconciler = Reconciler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.gateway),
            Arc::clone(&self.catalog),
            self.foundation.clone(),
            self.poll_interval,
        );
        self.reconcilers.spawn(resource_id, async move {
            reconciler.run(resource_id, operation).await;
        })
    }
}
