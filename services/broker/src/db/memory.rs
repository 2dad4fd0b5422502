//! In-memory registry.
//!
//! Backs integration tests and local runs without a database. Secrets are
//! held in memory only, so no at-rest encryption applies here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mdsb_id::ResourceId;

use crate::model::{ClaimFilter, ClaimRecord, ClaimStatus, ResourceRecord};

use super::{DbError, Registry};

#[derive(Default)]
struct MemoryState {
    resources: HashMap<ResourceId, ResourceRecord>,
    claims: Vec<ClaimRecord>,
    next_claim_id: i64,
}

/// Registry implementation over process memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn matches(&self, claim: &ClaimRecord, filter: &ClaimFilter) -> bool {
        if let Some(v) = &filter.instance_id {
            if &claim.instance_id != v {
                return false;
            }
        }
        if let Some(v) = &filter.organization {
            if &claim.organization != v {
                return false;
            }
        }
        if let Some(v) = &filter.space {
            if &claim.space != v {
                return false;
            }
        }
        if let Some(v) = &filter.name {
            if &claim.name != v {
                return false;
            }
        }
        if let Some(v) = &filter.foundation {
            if &claim.foundation != v {
                return false;
            }
        }
        if let Some(v) = filter.status {
            if claim.status != v {
                return false;
            }
        }
        if let Some(v) = filter.resource_id {
            if claim.resource_id != v {
                return false;
            }
        }
        if let Some(v) = filter.resource_status {
            match self.resources.get(&claim.resource_id) {
                Some(resource) if resource.status == v => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn insert_resource(&self, resource: &ResourceRecord) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn update_resource(&self, resource: &ResourceRecord) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, DbError> {
        let state = self.state.lock().unwrap();
        Ok(state.resources.get(&id).cloned())
    }

    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<i64, DbError> {
        let mut state = self.state.lock().unwrap();
        state.next_claim_id += 1;
        let id = state.next_claim_id;
        let mut claim = claim.clone();
        claim.id = id;
        state.claims.push(claim);
        Ok(id)
    }

    async fn update_claim(&self, claim: &ClaimRecord) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.claims.iter_mut().find(|c| c.id == claim.id) {
            *existing = claim.clone();
        }
        Ok(())
    }

    async fn find_claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, DbError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .claims
            .iter()
            .filter(|c| state.matches(c, filter))
            .cloned()
            .collect())
    }

    async fn delete_claim(&self, instance_id: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.claims.retain(|c| c.instance_id != instance_id);
        Ok(())
    }

    async fn count_references(&self, resource_id: ResourceId) -> Result<i64, DbError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .claims
            .iter()
            .filter(|c| c.resource_id == resource_id)
            .count() as i64)
    }

    async fn set_claim_status_for_resource(
        &self,
        resource_id: ResourceId,
        status: ClaimStatus,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        for claim in state
            .claims
            .iter_mut()
            .filter(|c| c.resource_id == resource_id)
        {
            claim.status = status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    fn claim(instance_id: &str, resource_id: ResourceId) -> ClaimRecord {
        ClaimRecord {
            id: 0,
            instance_id: instance_id.to_string(),
            service_id: "svc-1".to_string(),
            plan_id: "plan-small".to_string(),
            parameters: "{}".to_string(),
            foundation: "fnd-a".to_string(),
            organization: "org-a".to_string(),
            space: "space-a".to_string(),
            name: "mydb".to_string(),
            resource_id,
            status: ClaimStatus::InProgress,
        }
    }

    #[tokio::test]
    async fn claim_ids_are_assigned_monotonically() {
        let registry = MemoryRegistry::new();
        let resource = ResourceRecord::new(ResourceKind::Relational, "mariadb");
        registry.insert_resource(&resource).await.unwrap();

        let a = registry.insert_claim(&claim("i-1", resource.id)).await.unwrap();
        let b = registry.insert_claim(&claim("i-2", resource.id)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn find_claims_filters_by_resource_status() {
        let registry = MemoryRegistry::new();
        let resource = ResourceRecord::new(ResourceKind::Relational, "mariadb");
        registry.insert_resource(&resource).await.unwrap();
        registry.insert_claim(&claim("i-1", resource.id)).await.unwrap();

        let filter = ClaimFilter::by_key("org-a", "space-a", "mydb")
            .with_resource_status(crate::model::ResourceStatus::CreateSucceeded);
        assert!(registry.find_claims(&filter).await.unwrap().is_empty());

        let filter = ClaimFilter::by_key("org-a", "space-a", "mydb")
            .with_resource_status(crate::model::ResourceStatus::Preparing);
        assert_eq!(registry.find_claims(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_claim_and_count_references() {
        let registry = MemoryRegistry::new();
        let resource = ResourceRecord::new(ResourceKind::Relational, "mariadb");
        registry.insert_resource(&resource).await.unwrap();
        registry.insert_claim(&claim("i-1", resource.id)).await.unwrap();
        registry.insert_claim(&claim("i-2", resource.id)).await.unwrap();

        assert_eq!(registry.count_references(resource.id).await.unwrap(), 2);
        registry.delete_claim("i-1").await.unwrap();
        assert_eq!(registry.count_references(resource.id).await.unwrap(), 1);
        // deleting an absent claim is not an error
        registry.delete_claim("i-1").await.unwrap();
    }
}
