//! Deterministic in-process provider.
//!
//! Models the asynchronous provider contract faithfully enough for tests
//! and local runs: creates are accepted immediately and become available
//! after a configurable number of describe calls, deletes are observed
//! only through a terminal not-found describe, and access roles live in a
//! set keyed by their deterministic names.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::model::ResourceKind;

use super::{
    AccessRoleSpec, CreateResourceSpec, FinalSnapshotPolicy, MemberNode, ProviderError,
    ProviderErrorKind, ProviderGateway, ResourceDescription, RoleDeletion, SnapshotDescription,
    Tag, PROVIDER_STATUS_AVAILABLE,
};

#[derive(Debug, Clone)]
struct SimResource {
    kind: ResourceKind,
    engine: String,
    node_count: i64,
    /// Describe calls left until the resource reports available.
    polls_until_available: u32,
    /// Further describe calls until member nodes follow (multi-node kinds).
    member_polls_remaining: u32,
    /// Set once a delete was submitted.
    deleting: bool,
    /// Describe calls left until a deleting resource reports not-found.
    polls_until_gone: u32,
}

#[derive(Default)]
struct SimState {
    resources: HashMap<String, SimResource>,
    snapshots: HashMap<String, SnapshotDescription>,
    roles: HashSet<String>,
    reject_next_create: Option<ProviderError>,
    fail_next_describe: Option<ProviderError>,
    create_calls: u64,
    delete_calls: u64,
    create_latency_polls: u32,
    member_latency_polls: u32,
    delete_latency_polls: u32,
}

/// The simulated provider gateway.
pub struct SimulatedGateway {
    state: Mutex<SimState>,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                create_latency_polls: 1,
                member_latency_polls: 1,
                delete_latency_polls: 1,
                ..Default::default()
            }),
        }
    }

    /// Describe calls a fresh resource stays non-available for.
    pub fn set_create_latency(&self, polls: u32) {
        self.state.lock().unwrap().create_latency_polls = polls;
    }

    /// Extra describe calls member nodes lag behind the cluster.
    pub fn set_member_latency(&self, polls: u32) {
        self.state.lock().unwrap().member_latency_polls = polls;
    }

    /// Describe calls a deleting resource stays visible for.
    pub fn set_delete_latency(&self, polls: u32) {
        self.state.lock().unwrap().delete_latency_polls = polls;
    }

    /// Fail the next create submission with the given error.
    pub fn reject_next_create(&self, error: ProviderError) {
        self.state.lock().unwrap().reject_next_create = Some(error);
    }

    /// Fail the next describe with the given error.
    pub fn fail_next_describe(&self, error: ProviderError) {
        self.state.lock().unwrap().fail_next_describe = Some(error);
    }

    /// Register a stored snapshot with its provisioning tags.
    pub fn put_snapshot(&self, snapshot_id: &str, tags: Vec<Tag>) {
        self.state.lock().unwrap().snapshots.insert(
            snapshot_id.to_string(),
            SnapshotDescription {
                id: snapshot_id.to_string(),
                tags,
            },
        );
    }

    /// Pre-create an access role, as if it already existed.
    pub fn put_role(&self, role_name: &str) {
        self.state.lock().unwrap().roles.insert(role_name.to_string());
    }

    pub fn has_role(&self, role_name: &str) -> bool {
        self.state.lock().unwrap().roles.contains(role_name)
    }

    pub fn resource_exists(&self, provider_id: &str) -> bool {
        self.state.lock().unwrap().resources.contains_key(provider_id)
    }

    pub fn create_calls(&self) -> u64 {
        self.state.lock().unwrap().create_calls
    }

    pub fn delete_calls(&self) -> u64 {
        self.state.lock().unwrap().delete_calls
    }
}

fn endpoint_port(engine: &str) -> i32 {
    match engine {
        "postgres" => 5432,
        "docdb" => 27017,
        _ => 3306,
    }
}

#[async_trait]
impl ProviderGateway for SimulatedGateway {
    async fn create(&self, spec: &CreateResourceSpec) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;

        if let Some(error) = state.reject_next_create.take() {
            return Err(error);
        }
        if state.resources.contains_key(&spec.provider_id) {
            return Err(ProviderError::new(
                ProviderErrorKind::AlreadyExists,
                format!("resource {} already exists", spec.provider_id),
            ));
        }
        if let Some(snapshot_id) = &spec.restore_from_snapshot {
            if !state.snapshots.contains_key(snapshot_id) {
                return Err(ProviderError::not_found(format!(
                    "snapshot {snapshot_id} does not exist"
                )));
            }
        }

        let resource = SimResource {
            kind: spec.kind,
            engine: spec.engine.clone(),
            node_count: spec.node_count,
            polls_until_available: state.create_latency_polls,
            member_polls_remaining: state.member_latency_polls,
            deleting: false,
            polls_until_gone: 0,
        };
        debug!(provider_id = %spec.provider_id, kind = %spec.kind, "sim: create accepted");
        state.resources.insert(spec.provider_id.clone(), resource);
        Ok(())
    }

    async fn describe(
        &self,
        _kind: ResourceKind,
        provider_id: &str,
    ) -> Result<ResourceDescription, ProviderError> {
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.fail_next_describe.take() {
            return Err(error);
        }

        let Some(resource) = state.resources.get_mut(provider_id) else {
            return Err(ProviderError::not_found(format!(
                "resource {provider_id} was not found"
            )));
        };

        if resource.deleting {
            if resource.polls_until_gone > 0 {
                resource.polls_until_gone -= 1;
                return Ok(ResourceDescription {
                    status: "deleting".to_string(),
                    endpoint_host: None,
                    endpoint_port: None,
                    nodes: Vec::new(),
                });
            }
            state.resources.remove(provider_id);
            return Err(ProviderError::not_found(format!(
                "resource {provider_id} was not found"
            )));
        }

        if resource.polls_until_available > 0 {
            resource.polls_until_available -= 1;
            return Ok(ResourceDescription {
                status: "creating".to_string(),
                endpoint_host: None,
                endpoint_port: None,
                nodes: Vec::new(),
            });
        }

        let members_pending = resource.kind.is_multi_node() && resource.member_polls_remaining > 0;
        if members_pending {
            resource.member_polls_remaining -= 1;
        }
        let node_status = if members_pending {
            "creating"
        } else {
            PROVIDER_STATUS_AVAILABLE
        };
        let nodes = if resource.kind.is_multi_node() {
            (0..resource.node_count)
                .map(|ix| MemberNode {
                    id: format!("{provider_id}-{ix}"),
                    status: node_status.to_string(),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(ResourceDescription {
            status: PROVIDER_STATUS_AVAILABLE.to_string(),
            endpoint_host: Some(format!("{provider_id}.sim.internal")),
            endpoint_port: Some(endpoint_port(&resource.engine)),
            nodes,
        })
    }

    async fn delete(
        &self,
        _kind: ResourceKind,
        provider_id: &str,
        _final_snapshot: &FinalSnapshotPolicy,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;

        let delete_latency = state.delete_latency_polls;
        let Some(resource) = state.resources.get_mut(provider_id) else {
            return Err(ProviderError::not_found(format!(
                "resource {provider_id} was not found"
            )));
        };

        debug!(provider_id, "sim: delete accepted");
        resource.deleting = true;
        resource.polls_until_gone = delete_latency;
        Ok(())
    }

    async fn describe_snapshot(
        &self,
        _kind: ResourceKind,
        snapshot_id: &str,
    ) -> Result<SnapshotDescription, ProviderError> {
        let state = self.state.lock().unwrap();
        state.snapshots.get(snapshot_id).cloned().ok_or_else(|| {
            ProviderError::not_found(format!("snapshot {snapshot_id} was not found"))
        })
    }

    async fn create_access_role(&self, spec: &AccessRoleSpec) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if !state.roles.insert(spec.role_name.clone()) {
            return Err(ProviderError::new(
                ProviderErrorKind::AlreadyExists,
                format!("access role {} already exists", spec.role_name),
            ));
        }
        Ok(())
    }

    async fn delete_access_role(&self, role_name: &str) -> Result<RoleDeletion, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.roles.remove(role_name) {
            Ok(RoleDeletion::Deleted)
        } else {
            Ok(RoleDeletion::AlreadyAbsent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider_id: &str, kind: ResourceKind, engine: &str, nodes: i64) -> CreateResourceSpec {
        CreateResourceSpec {
            kind,
            provider_id: provider_id.to_string(),
            class: "db.t3.micro".to_string(),
            engine: engine.to_string(),
            master_username: "admin".to_string(),
            master_password: "pw".to_string(),
            database_name: Some("db".to_string()),
            allocated_storage_gb: 5,
            multi_zone: false,
            retention_days: 7,
            auto_minor_version_upgrade: true,
            node_count: nodes,
            restore_from_snapshot: None,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn resource_becomes_available_after_latency() {
        let gateway = SimulatedGateway::new();
        gateway.set_create_latency(2);
        gateway
            .create(&spec("ds-a", ResourceKind::Relational, "mariadb", 1))
            .await
            .unwrap();

        for _ in 0..2 {
            let desc = gateway.describe(ResourceKind::Relational, "ds-a").await.unwrap();
            assert_eq!(desc.status, "creating");
        }
        let desc = gateway.describe(ResourceKind::Relational, "ds-a").await.unwrap();
        assert!(desc.is_available());
        assert_eq!(desc.endpoint_port, Some(3306));
        assert_eq!(desc.endpoint_host.as_deref(), Some("ds-a.sim.internal"));
    }

    #[tokio::test]
    async fn member_nodes_lag_behind_cluster() {
        let gateway = SimulatedGateway::new();
        gateway.set_create_latency(0);
        gateway.set_member_latency(1);
        gateway
            .create(&spec("ds-b", ResourceKind::Document, "docdb", 3))
            .await
            .unwrap();

        let desc = gateway.describe(ResourceKind::Document, "ds-b").await.unwrap();
        assert!(desc.is_available());
        assert_eq!(desc.nodes.len(), 3);
        assert!(!desc.all_nodes_available());

        let desc = gateway.describe(ResourceKind::Document, "ds-b").await.unwrap();
        assert!(desc.all_nodes_available());
    }

    #[tokio::test]
    async fn deleted_resource_eventually_reports_not_found() {
        let gateway = SimulatedGateway::new();
        gateway.set_create_latency(0);
        gateway
            .create(&spec("ds-c", ResourceKind::Relational, "postgres", 1))
            .await
            .unwrap();
        gateway
            .delete(ResourceKind::Relational, "ds-c", &FinalSnapshotPolicy::Skip)
            .await
            .unwrap();

        let desc = gateway.describe(ResourceKind::Relational, "ds-c").await.unwrap();
        assert_eq!(desc.status, "deleting");
        let err = gateway.describe(ResourceKind::Relational, "ds-c").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!gateway.resource_exists("ds-c"));
    }

    #[tokio::test]
    async fn roles_are_idempotent_by_name() {
        let gateway = SimulatedGateway::new();
        let role = AccessRoleSpec {
            role_name: "mdsb-ds-a-123".to_string(),
            authorized_account: "123".to_string(),
            description: String::new(),
            tags: Vec::new(),
        };
        gateway.create_access_role(&role).await.unwrap();
        let err = gateway.create_access_role(&role).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::AlreadyExists);

        assert_eq!(
            gateway.delete_access_role("mdsb-ds-a-123").await.unwrap(),
            RoleDeletion::Deleted
        );
        assert_eq!(
            gateway.delete_access_role("mdsb-ds-a-123").await.unwrap(),
            RoleDeletion::AlreadyAbsent
        );
    }
}
