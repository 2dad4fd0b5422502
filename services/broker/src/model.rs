//! Persisted record types and status vocabularies.
//!
//! The status string forms are a wire contract: the protocol layer reports
//! them verbatim to callers, and the registry persists them as-is. Changing
//! a string here changes what every foundation observes.

use chrono::{DateTime, Utc};
use mdsb_id::ResourceId;
use serde::{Deserialize, Serialize};

/// Kind of backing data store a physical resource represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A single-node relational database (mysql, mariadb, postgres).
    Relational,
    /// A clustered document database; readiness requires every member node.
    Document,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Relational => "relational",
            ResourceKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relational" => Some(ResourceKind::Relational),
            "document" => Some(ResourceKind::Document),
            _ => None,
        }
    }

    /// Multi-node kinds only report ready once every member node is ready.
    pub fn is_multi_node(&self) -> bool {
        matches!(self, ResourceKind::Document)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a physical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// Inserted, no provider call submitted yet.
    Preparing,
    CreateInProgress,
    CreateFailed,
    CreateSucceeded,
    DeleteInProgress,
    DeleteFailed,
    DeleteSucceeded,
    /// A describe failed with an error other than "gone as expected".
    NotFound,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Preparing => "preparing for create",
            ResourceStatus::CreateInProgress => "create in progress",
            ResourceStatus::CreateFailed => "create failed",
            ResourceStatus::CreateSucceeded => "create succeeded",
            ResourceStatus::DeleteInProgress => "delete in progress",
            ResourceStatus::DeleteFailed => "delete failed",
            ResourceStatus::DeleteSucceeded => "delete succeeded",
            ResourceStatus::NotFound => "not found",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparing for create" => Some(ResourceStatus::Preparing),
            "create in progress" => Some(ResourceStatus::CreateInProgress),
            "create failed" => Some(ResourceStatus::CreateFailed),
            "create succeeded" => Some(ResourceStatus::CreateSucceeded),
            "delete in progress" => Some(ResourceStatus::DeleteInProgress),
            "delete failed" => Some(ResourceStatus::DeleteFailed),
            "delete succeeded" => Some(ResourceStatus::DeleteSucceeded),
            "not found" => Some(ResourceStatus::NotFound),
            _ => None,
        }
    }

    /// A terminal status is one no reconciler will advance further.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ResourceStatus::Preparing
                | ResourceStatus::CreateInProgress
                | ResourceStatus::DeleteInProgress
        )
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a logical instance (a foundation's claim on a resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimStatus {
    InProgress,
    Failed,
    Succeeded,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::InProgress => "in progress",
            ClaimStatus::Failed => "failed",
            ClaimStatus::Succeeded => "succeeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in progress" => Some(ClaimStatus::InProgress),
            "failed" => Some(ClaimStatus::Failed),
            "succeeded" => Some(ClaimStatus::Succeeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider-facing identifier derived from a resource id.
///
/// Providers constrain identifiers to lowercase alphanumerics and hyphens,
/// so the ULID portion is lowercased.
pub fn provider_id_for(id: &ResourceId) -> String {
    format!("ds-{}", id.ulid().to_string().to_lowercase())
}

/// Render a connection URI for an engine from structured endpoint fields.
///
/// Returns `None` for an engine without a registered scheme. Document
/// engines take no database segment.
pub fn render_connection_uri(
    engine: &str,
    user: &str,
    password: &str,
    host: &str,
    port: i32,
    database: Option<&str>,
) -> Option<String> {
    let db = database.unwrap_or("");
    match engine {
        "mysql" => Some(format!("mysql://{user}:{password}@{host}:{port}/{db}")),
        "postgres" => Some(format!("postgresql://{user}:{password}@{host}:{port}/{db}")),
        "mariadb" => Some(format!("mariadb://{user}:{password}@{host}:{port}/{db}")),
        "docdb" => Some(format!("mongodb://{user}:{password}@{host}:{port}/")),
        _ => None,
    }
}

/// A physical backing data store known to the provider.
///
/// `service_password` is plaintext in memory only; the registry encrypts it
/// before persisting and decrypts it on read.
#[derive(Clone)]
pub struct ResourceRecord {
    pub id: ResourceId,
    /// Identifier the provider knows the resource by; never caller-visible.
    pub provider_id: String,
    pub kind: ResourceKind,
    pub engine: String,
    pub status: ResourceStatus,
    pub last_status_update: DateTime<Utc>,
    pub last_message: String,
    pub endpoint_host: Option<String>,
    pub endpoint_port: Option<i32>,
    pub database_name: Option<String>,
    pub service_user: Option<String>,
    pub service_password: Option<String>,
}

impl ResourceRecord {
    /// A fresh record in the `Preparing` state, before any provider call.
    pub fn new(kind: ResourceKind, engine: impl Into<String>) -> Self {
        let id = ResourceId::new();
        let provider_id = provider_id_for(&id);
        Self {
            id,
            provider_id,
            kind,
            engine: engine.into(),
            status: ResourceStatus::Preparing,
            last_status_update: Utc::now(),
            last_message: String::new(),
            endpoint_host: None,
            endpoint_port: None,
            database_name: None,
            service_user: None,
            service_password: None,
        }
    }

    /// Connection URI rendered on demand from the structured fields.
    ///
    /// `None` until the endpoint is known.
    pub fn connection_uri(&self) -> Option<String> {
        let host = self.endpoint_host.as_deref()?;
        let port = self.endpoint_port?;
        let user = self.service_user.as_deref()?;
        let password = self.service_password.as_deref()?;
        render_connection_uri(
            &self.engine,
            user,
            password,
            host,
            port,
            self.database_name.as_deref(),
        )
    }
}

impl std::fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("id", &self.id)
            .field("provider_id", &self.provider_id)
            .field("kind", &self.kind)
            .field("engine", &self.engine)
            .field("status", &self.status.as_str())
            .field("last_status_update", &self.last_status_update)
            .field("last_message", &self.last_message)
            .field("endpoint_host", &self.endpoint_host)
            .field("endpoint_port", &self.endpoint_port)
            .field("database_name", &self.database_name)
            .field("service_user", &self.service_user)
            .field("service_password", &"<redacted>")
            .finish()
    }
}

/// One foundation's claim on a physical resource.
#[derive(Debug, Clone)]
pub struct ClaimRecord {
    /// Registry-assigned row id; zero until inserted.
    pub id: i64,
    /// Caller-supplied instance id (unique across foundations).
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    /// Raw request parameters as received, serialized JSON.
    pub parameters: String,
    /// The foundation the claim was created from.
    pub foundation: String,
    pub organization: String,
    pub space: String,
    pub name: String,
    pub resource_id: ResourceId,
    pub status: ClaimStatus,
}

/// Filter for claim queries. All fields are conjunctive; `None` matches any.
#[derive(Debug, Default, Clone)]
pub struct ClaimFilter {
    pub instance_id: Option<String>,
    pub organization: Option<String>,
    pub space: Option<String>,
    pub name: Option<String>,
    pub foundation: Option<String>,
    pub status: Option<ClaimStatus>,
    /// Matches against the referenced resource's status (joined query).
    pub resource_status: Option<ResourceStatus>,
    pub resource_id: Option<ResourceId>,
}

impl ClaimFilter {
    /// Filter by the sharing key: (organization, space, instance name).
    pub fn by_key(organization: &str, space: &str, name: &str) -> Self {
        Self {
            organization: Some(organization.to_string()),
            space: Some(space.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn by_instance_id(instance_id: &str) -> Self {
        Self {
            instance_id: Some(instance_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ClaimStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_resource_status(mut self, status: ResourceStatus) -> Self {
        self.resource_status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            ResourceStatus::Preparing,
            ResourceStatus::CreateInProgress,
            ResourceStatus::CreateFailed,
            ResourceStatus::CreateSucceeded,
            ResourceStatus::DeleteInProgress,
            ResourceStatus::DeleteFailed,
            ResourceStatus::DeleteSucceeded,
            ResourceStatus::NotFound,
        ] {
            assert_eq!(ResourceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ResourceStatus::parse("unknown"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ResourceStatus::Preparing.is_terminal());
        assert!(!ResourceStatus::CreateInProgress.is_terminal());
        assert!(!ResourceStatus::DeleteInProgress.is_terminal());
        assert!(ResourceStatus::CreateSucceeded.is_terminal());
        assert!(ResourceStatus::DeleteSucceeded.is_terminal());
        assert!(ResourceStatus::NotFound.is_terminal());
    }

    #[test]
    fn provider_id_is_lowercase() {
        let id = ResourceId::new();
        let provider_id = provider_id_for(&id);
        assert!(provider_id.starts_with("ds-"));
        assert_eq!(provider_id, provider_id.to_lowercase());
    }

    #[test]
    fn connection_uri_per_engine() {
        assert_eq!(
            render_connection_uri("postgres", "u", "p", "h", 5432, Some("db")).as_deref(),
            Some("postgresql://u:p@h:5432/db")
        );
        assert_eq!(
            render_connection_uri("mariadb", "u", "p", "h", 3306, Some("db")).as_deref(),
            Some("mariadb://u:p@h:3306/db")
        );
        // document engines carry no database segment
        assert_eq!(
            render_connection_uri("docdb", "u", "p", "h", 27017, None).as_deref(),
            Some("mongodb://u:p@h:27017/")
        );
        assert_eq!(render_connection_uri("oracle", "u", "p", "h", 1521, None), None);
    }

    #[test]
    fn uri_rendered_only_once_endpoint_known() {
        let mut resource = ResourceRecord::new(ResourceKind::Relational, "mysql");
        resource.service_user = Some("admin".into());
        resource.service_password = Some("pw".into());
        assert_eq!(resource.connection_uri(), None);

        resource.endpoint_host = Some("db.internal".into());
        resource.endpoint_port = Some(3306);
        resource.database_name = Some("db".into());
        assert_eq!(
            resource.connection_uri().as_deref(),
            Some("mysql://admin:pw@db.internal:3306/db")
        );
    }

    #[test]
    fn debug_redacts_password() {
        let mut resource = ResourceRecord::new(ResourceKind::Relational, "mysql");
        resource.service_password = Some("supersecret".into());
        let rendered = format!("{resource:?}");
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
