//! Provider gateway: the abstract capability to create, describe, and
//! delete a backing data store of a given kind.
//!
//! The lifecycle core only ever talks to this trait. Real cloud SDK
//! adapters live behind it; the [`sim`] module provides a deterministic
//! in-process provider for tests and local runs.

pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ResourceKind;

/// Provider status string that marks a resource (or member node) ready.
pub const PROVIDER_STATUS_AVAILABLE: &str = "available";

/// Classified provider failures.
///
/// The lifecycle only branches on `NotFound`; the remaining kinds exist so
/// rejections carry a stable, loggable classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    AlreadyExists,
    QuotaExceeded,
    CapacityUnavailable,
    InvalidState,
    Misconfigured,
    Unauthorized,
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::AlreadyExists => "already_exists",
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::CapacityUnavailable => "capacity_unavailable",
            ProviderErrorKind::InvalidState => "invalid_state",
            ProviderErrorKind::Misconfigured => "misconfigured",
            ProviderErrorKind::Unauthorized => "unauthorized",
            ProviderErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by the provider.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// A provisioning tag attached to resources, snapshots, and access roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Specification for a new backing resource.
#[derive(Clone)]
pub struct CreateResourceSpec {
    pub kind: ResourceKind,
    pub provider_id: String,
    pub class: String,
    pub engine: String,
    pub master_username: String,
    pub master_password: String,
    pub database_name: Option<String>,
    pub allocated_storage_gb: i64,
    pub multi_zone: bool,
    pub retention_days: i64,
    pub auto_minor_version_upgrade: bool,
    /// Member nodes to provision; meaningful for multi-node kinds only.
    pub node_count: i64,
    pub restore_from_snapshot: Option<String>,
    pub tags: Vec<Tag>,
}

impl std::fmt::Debug for CreateResourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateResourceSpec")
            .field("kind", &self.kind)
            .field("provider_id", &self.provider_id)
            .field("class", &self.class)
            .field("engine", &self.engine)
            .field("master_username", &self.master_username)
            .field("master_password", &"<redacted>")
            .field("database_name", &self.database_name)
            .field("allocated_storage_gb", &self.allocated_storage_gb)
            .field("multi_zone", &self.multi_zone)
            .field("retention_days", &self.retention_days)
            .field("auto_minor_version_upgrade", &self.auto_minor_version_upgrade)
            .field("node_count", &self.node_count)
            .field("restore_from_snapshot", &self.restore_from_snapshot)
            .field("tags", &self.tags)
            .finish()
    }
}

/// One member node of a clustered resource.
#[derive(Debug, Clone)]
pub struct MemberNode {
    pub id: String,
    pub status: String,
}

impl MemberNode {
    pub fn is_available(&self) -> bool {
        self.status == PROVIDER_STATUS_AVAILABLE
    }
}

/// Snapshot of a resource's provider-side state, as observed by describe.
#[derive(Debug, Clone)]
pub struct ResourceDescription {
    /// Provider-assigned status string ("creating", "available", ...).
    pub status: String,
    pub endpoint_host: Option<String>,
    pub endpoint_port: Option<i32>,
    /// Member nodes; empty for single-node kinds.
    pub nodes: Vec<MemberNode>,
}

impl ResourceDescription {
    pub fn is_available(&self) -> bool {
        self.status == PROVIDER_STATUS_AVAILABLE
    }

    /// True once every member node individually reports ready.
    pub fn all_nodes_available(&self) -> bool {
        self.nodes.iter().all(MemberNode::is_available)
    }
}

/// A stored snapshot and its provisioning tags.
#[derive(Debug, Clone)]
pub struct SnapshotDescription {
    pub id: String,
    pub tags: Vec<Tag>,
}

impl SnapshotDescription {
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// What to do with data when a resource is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalSnapshotPolicy {
    Skip,
    Take { snapshot_id: String },
}

/// Specification for a scoped access role.
#[derive(Debug, Clone)]
pub struct AccessRoleSpec {
    /// Deterministic role name; enables idempotent lookup.
    pub role_name: String,
    pub authorized_account: String,
    pub description: String,
    pub tags: Vec<Tag>,
}

/// Outcome of an access-role deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    Deleted,
    AlreadyAbsent,
}

/// Abstract capability to manage backing resources of the supported kinds.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Submit a create (or restore-from-snapshot). Acceptance means the
    /// provider started working; readiness is observed via [`describe`].
    ///
    /// [`describe`]: ProviderGateway::describe
    async fn create(&self, spec: &CreateResourceSpec) -> Result<(), ProviderError>;

    async fn describe(
        &self,
        kind: ResourceKind,
        provider_id: &str,
    ) -> Result<ResourceDescription, ProviderError>;

    async fn delete(
        &self,
        kind: ResourceKind,
        provider_id: &str,
        final_snapshot: &FinalSnapshotPolicy,
    ) -> Result<(), ProviderError>;

    async fn describe_snapshot(
        &self,
        kind: ResourceKind,
        snapshot_id: &str,
    ) -> Result<SnapshotDescription, ProviderError>;

    async fn create_access_role(&self, spec: &AccessRoleSpec) -> Result<(), ProviderError>;

    async fn delete_access_role(&self, role_name: &str) -> Result<RoleDeletion, ProviderError>;
}
