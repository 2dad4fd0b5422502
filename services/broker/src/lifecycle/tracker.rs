//! Reference tracking.
//!
//! Decides, for a given (organization, space, instance name) key, whether a
//! create request starts a fresh physical resource or attaches to an
//! existing one, and whether a delete request actually tears the backing
//! resource down or merely drops one reference to it. Queries span all
//! foundations; sharing is the point.

use crate::db::{DbError, Registry};
use crate::model::{ClaimFilter, ClaimRecord, ClaimStatus, ResourceRecord, ResourceStatus};

/// Outcome of evaluating a create request against existing claims.
#[derive(Debug)]
pub enum CreateDecision {
    /// The key is taken with an incompatible plan or a delete is running.
    Conflict(String),
    /// Another foundation already finished creating this resource.
    AttachSucceeded { resource: ResourceRecord },
    /// A create for this resource is running; join it.
    AttachInProgress {
        resource: ResourceRecord,
        from_foundation: String,
    },
    /// No existing claim; provision a brand-new resource.
    ProvisionNew,
}

/// Outcome of evaluating a delete request for an existing claim.
#[derive(Debug)]
pub enum DeleteDecision {
    /// The backing resource is still being created elsewhere.
    CreateStillInProgress,
    /// A delete is already running elsewhere; join it.
    AttachDeleteInProgress { resource: ResourceRecord },
    /// The provider already confirmed the resource gone.
    AlreadyGone,
    /// Other claims remain; drop only this reference.
    Dereference { remaining: i64 },
    /// This is the last reference; submit a real deprovision.
    Teardown { resource: ResourceRecord },
}

pub async fn decide_create(
    registry: &dyn Registry,
    organization: &str,
    space: &str,
    name: &str,
    plan_id: &str,
) -> Result<CreateDecision, DbError> {
    let in_progress = registry
        .find_claims(&ClaimFilter::by_key(organization, space, name).with_status(ClaimStatus::InProgress))
        .await?;
    let succeeded = registry
        .find_claims(
            &ClaimFilter::by_key(organization, space, name)
                .with_resource_status(ResourceStatus::CreateSucceeded),
        )
        .await?;

    let plan_mismatch = |claims: &[ClaimRecord]| claims.first().is_some_and(|c| c.plan_id != plan_id);
    if plan_mismatch(&in_progress) || plan_mismatch(&succeeded) {
        return Ok(CreateDecision::Conflict(format!(
            "requested plan id ({plan_id}) is not equal to the plan id of the already existing service"
        )));
    }

    if in_progress.is_empty() {
        if let Some(existing) = succeeded.first() {
            let resource = resolve_resource(registry, existing).await?;
            return Ok(CreateDecision::AttachSucceeded { resource });
        }
        return Ok(CreateDecision::ProvisionNew);
    }

    let claim = &in_progress[0];
    let resource = resolve_resource(registry, claim).await?;
    match resource.status {
        ResourceStatus::Preparing | ResourceStatus::CreateInProgress => {
            Ok(CreateDecision::AttachInProgress {
                resource,
                from_foundation: claim.foundation.clone(),
            })
        }
        _ => Ok(CreateDecision::Conflict(format!(
            "a delete request is already in progress from foundation {}",
            claim.foundation
        ))),
    }
}

pub async fn decide_delete(
    registry: &dyn Registry,
    claim: &ClaimRecord,
) -> Result<DeleteDecision, DbError> {
    let resource = resolve_resource(registry, claim).await?;
    match resource.status {
        ResourceStatus::Preparing | ResourceStatus::CreateInProgress => {
            Ok(DeleteDecision::CreateStillInProgress)
        }
        ResourceStatus::DeleteInProgress => Ok(DeleteDecision::AttachDeleteInProgress { resource }),
        ResourceStatus::DeleteSucceeded => Ok(DeleteDecision::AlreadyGone),
        _ => {
            let references = registry.count_references(resource.id).await?;
            if references > 1 {
                Ok(DeleteDecision::Dereference {
                    remaining: references - 1,
                })
            } else {
                Ok(DeleteDecision::Teardown { resource })
            }
        }
    }
}

async fn resolve_resource(
    registry: &dyn Registry,
    claim: &ClaimRecord,
) -> Result<ResourceRecord, DbError> {
    registry.get_resource(claim.resource_id).await?.ok_or_else(|| {
        DbError::Decode(format!(
            "claim {} references missing resource {}",
            claim.instance_id, claim.resource_id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryRegistry;
    use crate::model::ResourceKind;

    async fn seed(
        registry: &MemoryRegistry,
        status: ResourceStatus,
        claims: &[(&str, &str, ClaimStatus)],
    ) -> ResourceRecord {
        let mut resource = ResourceRecord::new(ResourceKind::Relational, "mariadb");
        resource.status = status;
        registry.insert_resource(&resource).await.unwrap();
        for (instance_id, plan_id, claim_status) in claims {
            let claim = ClaimRecord {
                id: 0,
                instance_id: instance_id.to_string(),
                service_id: "svc-rel".to_string(),
                plan_id: plan_id.to_string(),
                parameters: "{}".to_string(),
                foundation: "fnd-other".to_string(),
                organization: "org-a".to_string(),
                space: "space-a".to_string(),
                name: "mydb".to_string(),
                resource_id: resource.id,
                status: *claim_status,
            };
            registry.insert_claim(&claim).await.unwrap();
        }
        resource
    }

    #[tokio::test]
    async fn fresh_key_provisions_new() {
        let registry = MemoryRegistry::new();
        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-small")
            .await
            .unwrap();
        assert!(matches!(decision, CreateDecision::ProvisionNew));
    }

    #[tokio::test]
    async fn in_progress_same_plan_attaches() {
        let registry = MemoryRegistry::new();
        let resource = seed(
            &registry,
            ResourceStatus::CreateInProgress,
            &[("i-1", "plan-small", ClaimStatus::InProgress)],
        )
        .await;

        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-small")
            .await
            .unwrap();
        match decision {
            CreateDecision::AttachInProgress {
                resource: attached,
                from_foundation,
            } => {
                assert_eq!(attached.id, resource.id);
                assert_eq!(from_foundation, "fnd-other");
            }
            other => panic!("expected AttachInProgress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_progress_plan_mismatch_conflicts() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::CreateInProgress,
            &[("i-1", "plan-small", ClaimStatus::InProgress)],
        )
        .await;

        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-medium")
            .await
            .unwrap();
        assert!(matches!(decision, CreateDecision::Conflict(_)));
    }

    #[tokio::test]
    async fn succeeded_same_plan_attaches_without_provider_call() {
        let registry = MemoryRegistry::new();
        let resource = seed(
            &registry,
            ResourceStatus::CreateSucceeded,
            &[("i-1", "plan-small", ClaimStatus::Succeeded)],
        )
        .await;

        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-small")
            .await
            .unwrap();
        match decision {
            CreateDecision::AttachSucceeded { resource: attached } => {
                assert_eq!(attached.id, resource.id);
            }
            other => panic!("expected AttachSucceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn succeeded_plan_mismatch_conflicts() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::CreateSucceeded,
            &[("i-1", "plan-small", ClaimStatus::Succeeded)],
        )
        .await;

        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-medium")
            .await
            .unwrap();
        assert!(matches!(decision, CreateDecision::Conflict(_)));
    }

    #[tokio::test]
    async fn create_attach_while_delete_runs_conflicts() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::DeleteInProgress,
            &[("i-1", "plan-small", ClaimStatus::InProgress)],
        )
        .await;

        let decision = decide_create(&registry, "org-a", "space-a", "mydb", "plan-small")
            .await
            .unwrap();
        assert!(matches!(decision, CreateDecision::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_while_create_in_progress_is_rejected() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::CreateInProgress,
            &[("i-1", "plan-small", ClaimStatus::InProgress)],
        )
        .await;
        let claim = registry.get_claim("i-1").await.unwrap().unwrap();

        let decision = decide_delete(&registry, &claim).await.unwrap();
        assert!(matches!(decision, DeleteDecision::CreateStillInProgress));
    }

    #[tokio::test]
    async fn delete_with_remaining_references_dereferences() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::CreateSucceeded,
            &[
                ("i-1", "plan-small", ClaimStatus::Succeeded),
                ("i-2", "plan-small", ClaimStatus::Succeeded),
                ("i-3", "plan-small", ClaimStatus::Succeeded),
            ],
        )
        .await;
        let claim = registry.get_claim("i-2").await.unwrap().unwrap();

        let decision = decide_delete(&registry, &claim).await.unwrap();
        match decision {
            DeleteDecision::Dereference { remaining } => assert_eq!(remaining, 2),
            other => panic!("expected Dereference, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_of_last_reference_tears_down() {
        let registry = MemoryRegistry::new();
        let resource = seed(
            &registry,
            ResourceStatus::CreateSucceeded,
            &[("i-1", "plan-small", ClaimStatus::Succeeded)],
        )
        .await;
        let claim = registry.get_claim("i-1").await.unwrap().unwrap();

        let decision = decide_delete(&registry, &claim).await.unwrap();
        match decision {
            DeleteDecision::Teardown { resource: found } => assert_eq!(found.id, resource.id),
            other => panic!("expected Teardown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_attaches_to_running_delete() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::DeleteInProgress,
            &[
                ("i-1", "plan-small", ClaimStatus::InProgress),
                ("i-2", "plan-small", ClaimStatus::Succeeded),
            ],
        )
        .await;
        let claim = registry.get_claim("i-2").await.unwrap().unwrap();

        let decision = decide_delete(&registry, &claim).await.unwrap();
        assert!(matches!(decision, DeleteDecision::AttachDeleteInProgress { .. }));
    }

    #[tokio::test]
    async fn delete_after_resource_gone_reports_gone() {
        let registry = MemoryRegistry::new();
        seed(
            &registry,
            ResourceStatus::DeleteSucceeded,
            &[("i-1", "plan-small", ClaimStatus::Succeeded)],
        )
        .await;
        let claim = registry.get_claim("i-1").await.unwrap().unwrap();

        let decision = decide_delete(&registry, &claim).await.unwrap();
        assert!(matches!(decision, DeleteDecision::AlreadyGone));
    }
}
