//! Typed ID definitions for broker records.
//!
//! Each ID type has a unique prefix that identifies the record kind.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Resources and Requests
// =============================================================================

define_id!(ResourceId, "res");
define_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;

    #[test]
    fn new_ids_are_unique() {
        let a = ResourceId::new();
        let b = ResourceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn roundtrip_parse_format() {
        let id = ResourceId::new();
        let parsed = ResourceId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(ResourceId::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert_eq!(
            ResourceId::parse("res01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(IdError::MissingSeparator)
        );
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let id = RequestId::new().to_string();
        let err = ResourceId::parse(&id).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn parse_rejects_invalid_ulid() {
        let err = ResourceId::parse("res_not-a-ulid").unwrap_err();
        assert!(matches!(err, IdError::InvalidUlid(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let id = ResourceId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = ResourceId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ResourceId::new();
        assert!(a < b);
    }
}
