//! Provisioning tags.
//!
//! One descriptor table drives tag construction for every path: resources,
//! final snapshots (the provider copies resource tags onto them), and
//! access roles.

use crate::gateway::Tag;
use crate::model::ClaimRecord;

pub const TAG_ORGANIZATION: &str = "OrganizationName";
pub const TAG_SPACE: &str = "SpaceName";

/// Inputs the tag table draws from.
pub struct TagContext<'a> {
    pub claim: &'a ClaimRecord,
    pub service_name: &'a str,
    pub plan_name: &'a str,
}

/// Build the full provisioning tag set for a claim.
pub fn resource_tags(ctx: &TagContext<'_>) -> Vec<Tag> {
    let fields: [(&str, &str); 8] = [
        ("ServiceInstanceId", &ctx.claim.service_id),
        ("ServiceInstanceName", &ctx.claim.name),
        (TAG_SPACE, &ctx.claim.space),
        (TAG_ORGANIZATION, &ctx.claim.organization),
        ("CreatedFromFoundation", &ctx.claim.foundation),
        ("CreatedBy", "mdsb"),
        ("PlanName", ctx.plan_name),
        ("ServiceName", ctx.service_name),
    ];
    fields
        .iter()
        .map(|(key, value)| Tag::new(*key, *value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClaimStatus, ResourceKind, ResourceRecord};

    #[test]
    fn tag_table_covers_the_sharing_key() {
        let resource = ResourceRecord::new(ResourceKind::Relational, "mariadb");
        let claim = ClaimRecord {
            id: 1,
            instance_id: "i-1".to_string(),
            service_id: "svc-rel".to_string(),
            plan_id: "plan-small".to_string(),
            parameters: "{}".to_string(),
            foundation: "fnd-a".to_string(),
            organization: "org-a".to_string(),
            space: "space-a".to_string(),
            name: "mydb".to_string(),
            resource_id: resource.id,
            status: ClaimStatus::InProgress,
        };
        let tags = resource_tags(&TagContext {
            claim: &claim,
            service_name: "relational-datastore",
            plan_name: "small",
        });

        let value = |key: &str| {
            tags.iter()
                .find(|t| t.key == key)
                .map(|t| t.value.as_str())
        };
        assert_eq!(value(TAG_ORGANIZATION), Some("org-a"));
        assert_eq!(value(TAG_SPACE), Some("space-a"));
        assert_eq!(value("PlanName"), Some("small"));
        assert_eq!(value("ServiceName"), Some("relational-datastore"));
        assert_eq!(value("CreatedBy"), Some("mdsb"));
        assert_eq!(tags.len(), 8);
    }
}
