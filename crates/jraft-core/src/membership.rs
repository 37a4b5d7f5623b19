//! Rules for changing the cluster configuration

use crate::error::MembershipError;
use crate::types::ClusterMember;

/// What adding a voter means for the current configuration
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoterChange {
    /// Already a voter at that address
    Unchanged,
    /// Present as a nonvoter at that address
    Promote,
    /// Not present yet
    Add,
}

/// Decide how `add_voter(id, address)` applies to `members`
///
/// An id that is already registered under a different address is refused
/// rather than silently re-pointed.
pub fn plan_add_voter(
    members: &[ClusterMember],
    id: &str,
    address: &str,
) -> Result<VoterChange, MembershipError> {
    if id.is_empty() || address.is_empty() {
        return Err(MembershipError::InvalidMember(
            "id and address are required".into(),
        ));
    }

    match members.iter().find(|m| m.id == id) {
        None => Ok(VoterChange::Add),
        Some(existing) if existing.address != address => Err(MembershipError::AddressConflict {
            id: id.to_string(),
            existing: existing.address.clone(),
            requested: address.to_string(),
        }),
        Some(existing) if existing.is_voter() => Ok(VoterChange::Unchanged),
        Some(_) => Ok(VoterChange::Promote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<ClusterMember> {
        vec![
            ClusterMember::voter("1", "10.0.0.1:50051"),
            ClusterMember::nonvoter("2", "10.0.0.2:50051"),
        ]
    }

    #[test]
    fn test_plan_add_voter() {
        let members = members();
        assert_eq!(
            plan_add_voter(&members, "3", "10.0.0.3:50051").unwrap(),
            VoterChange::Add
        );
        assert_eq!(
            plan_add_voter(&members, "1", "10.0.0.1:50051").unwrap(),
            VoterChange::Unchanged
        );
        assert_eq!(
            plan_add_voter(&members, "2", "10.0.0.2:50051").unwrap(),
            VoterChange::Promote
        );
    }

    #[test]
    fn test_address_conflict() {
        let err = plan_add_voter(&members(), "1", "10.0.0.9:50051").unwrap_err();
        assert_eq!(
            err,
            MembershipError::AddressConflict {
                id: "1".into(),
                existing: "10.0.0.1:50051".into(),
                requested: "10.0.0.9:50051".into(),
            }
        );
    }

    #[test]
    fn test_requires_id_and_address() {
        assert!(matches!(
            plan_add_voter(&[], "", "10.0.0.1:50051"),
            Err(MembershipError::InvalidMember(_))
        ));
        assert!(plan_add_voter(&[], "1", "").is_err());
    }
}
