//! Access-role side effects.
//!
//! A scoped access role is created after a successful create (only when
//! the request named an authorized external account) and removed after a
//! successful delete. The role name is deterministic from the resource's
//! provider identifier and the account, so lookup needs no side table and
//! both operations are idempotent.

use tracing::info;

use crate::gateway::{AccessRoleSpec, ProviderError, ProviderGateway, RoleDeletion, Tag};
use crate::lifecycle::params::ProvisionParams;
use crate::model::ResourceRecord;

/// Deterministic role name for a resource/account pair.
pub fn role_name(provider_id: &str, authorized_account: &str) -> String {
    format!("mdsb-{provider_id}-{authorized_account}")
}

/// Create the scoped access role if the request asked for one.
///
/// Failures (including "already exists") are returned to the caller to be
/// folded into the resource's last message; they must not fail the create.
pub async fn ensure_access_role(
    gateway: &dyn ProviderGateway,
    resource: &ResourceRecord,
    params: &ProvisionParams,
    tags: Vec<Tag>,
) -> Result<(), ProviderError> {
    let Some(account) = params.authorized_account.as_deref() else {
        return Ok(());
    };

    let spec = AccessRoleSpec {
        role_name: role_name(&resource.provider_id, account),
        authorized_account: account.to_string(),
        description: format!(
            "Allow limited access to data store {} for account {}",
            resource.provider_id, account
        ),
        tags,
    };
    gateway.create_access_role(&spec).await?;
    info!(role_name = %spec.role_name, "access role created");
    Ok(())
}

/// Remove the access role after the resource is gone.
///
/// An already-absent role counts as success.
pub async fn remove_access_role(
    gateway: &dyn ProviderGateway,
    resource: &ResourceRecord,
    params: &ProvisionParams,
) -> Result<(), ProviderError> {
    let Some(account) = params.authorized_account.as_deref() else {
        return Ok(());
    };

    let name = role_name(&resource.provider_id, account);
    match gateway.delete_access_role(&name).await? {
        RoleDeletion::Deleted => info!(role_name = %name, "access role deleted"),
        RoleDeletion::AlreadyAbsent => {
            info!(role_name = %name, "access role was already absent")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::sim::SimulatedGateway;
    use crate::model::ResourceKind;

    fn resource() -> ResourceRecord {
        ResourceRecord::new(ResourceKind::Relational, "mariadb")
    }

    fn params_with_account() -> ProvisionParams {
        ProvisionParams::from_raw(r#"{"AuthorizedAccount": "123456789012"}"#).unwrap()
    }

    #[test]
    fn role_name_is_deterministic() {
        assert_eq!(role_name("ds-abc", "123"), "mdsb-ds-abc-123");
        assert_eq!(role_name("ds-abc", "123"), role_name("ds-abc", "123"));
    }

    #[tokio::test]
    async fn no_account_means_no_role() {
        let gateway = SimulatedGateway::new();
        let resource = resource();
        ensure_access_role(&gateway, &resource, &ProvisionParams::default(), Vec::new())
            .await
            .unwrap();
        assert!(!gateway.has_role(&role_name(&resource.provider_id, "123456789012")));
    }

    #[tokio::test]
    async fn role_is_created_and_removed() {
        let gateway = SimulatedGateway::new();
        let resource = resource();
        let params = params_with_account();
        let name = role_name(&resource.provider_id, "123456789012");

        ensure_access_role(&gateway, &resource, &params, Vec::new())
            .await
            .unwrap();
        assert!(gateway.has_role(&name));

        remove_access_role(&gateway, &resource, &params).await.unwrap();
        assert!(!gateway.has_role(&name));
    }

    #[tokio::test]
    async fn existing_role_surfaces_as_error() {
        let gateway = SimulatedGateway::new();
        let resource = resource();
        let params = params_with_account();
        gateway.put_role(&role_name(&resource.provider_id, "123456789012"));

        let err = ensure_access_role(&gateway, &resource, &params, Vec::new())
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn removing_absent_role_succeeds() {
        let gateway = SimulatedGateway::new();
        let resource = resource();
        remove_access_role(&gateway, &resource, &params_with_account())
            .await
            .unwrap();
    }
}
