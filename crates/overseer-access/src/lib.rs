//! Resource access control
//!
//! A flat `(resource, principal) → permission bits` table. The control plane
//! has no authentication; acting identities are assumed authentic and this
//! layer only answers "may principal P do X to resource R". Every mutating
//! operation in the task manager runs through [`ResourceRegistry::check`]
//! before touching state.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use dashmap::DashMap;
use tracing::debug;

use overseer_core::{Error, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl Permission {
    pub const READ_ONLY: Self = Self::READ;
    pub const WRITE_ONLY: Self = Self::WRITE;
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);
    pub const FULL: Self = Self::READ.union(Self::WRITE).union(Self::EXECUTE);
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}

/// Per-resource entry: the owning principal plus explicit grants.
#[derive(Debug, Clone)]
struct ResourceEntry {
    owner: String,
    grants: HashMap<String, Permission>,
}

/// The resource registry. Thread-safe; each resource row is independent.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: DashMap<String, ResourceEntry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Register a resource with its owner and the owner's initial rights.
    pub fn register(
        &self,
        resource_id: impl Into<String>,
        owner_id: impl Into<String>,
        owner_permission: Permission,
    ) -> Result<()> {
        let resource_id = resource_id.into();
        let owner_id = owner_id.into();
        if self.resources.contains_key(&resource_id) {
            return Err(Error::illegal_state(format!(
                "resource '{resource_id}' is already registered"
            )));
        }
        let mut grants = HashMap::new();
        grants.insert(owner_id.clone(), owner_permission);
        debug!(resource = %resource_id, owner = %owner_id, rights = %owner_permission, "resource registered");
        self.resources.insert(
            resource_id,
            ResourceEntry {
                owner: owner_id,
                grants,
            },
        );
        Ok(())
    }

    /// Add rights for a principal on a resource (bits are OR-ed in).
    pub fn grant(
        &self,
        resource_id: &str,
        principal_id: impl Into<String>,
        permission: Permission,
    ) -> Result<()> {
        let mut entry = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Error::not_found(format!("resource '{resource_id}'")))?;
        let principal_id = principal_id.into();
        let slot = entry.grants.entry(principal_id).or_insert(Permission::empty());
        *slot |= permission;
        Ok(())
    }

    /// Drop all rights a principal holds on a resource.
    pub fn revoke(&self, resource_id: &str, principal_id: &str) -> Result<()> {
        let mut entry = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Error::not_found(format!("resource '{resource_id}'")))?;
        entry.grants.remove(principal_id);
        Ok(())
    }

    /// Fail unless the principal holds every bit of `required`.
    pub fn check(&self, resource_id: &str, principal_id: &str, required: Permission) -> Result<()> {
        let entry = self
            .resources
            .get(resource_id)
            .ok_or_else(|| Error::not_found(format!("resource '{resource_id}'")))?;
        let held = entry
            .grants
            .get(principal_id)
            .copied()
            .unwrap_or(Permission::empty());
        if held.contains(required) {
            Ok(())
        } else {
            Err(Error::permission_denied(
                resource_id,
                principal_id,
                required.to_string(),
            ))
        }
    }

    /// Non-failing variant of [`check`](Self::check).
    pub fn has(&self, resource_id: &str, principal_id: &str, required: Permission) -> bool {
        self.check(resource_id, principal_id, required).is_ok()
    }

    pub fn owner(&self, resource_id: &str) -> Option<String> {
        self.resources.get(resource_id).map(|e| e.owner.clone())
    }

    /// Remove a resource along with every principal entry for it.
    pub fn remove(&self, resource_id: &str) -> Result<()> {
        self.resources
            .remove(resource_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("resource '{resource_id}'")))
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.resources.contains_key(resource_id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_compose_the_expected_bits() {
        assert_eq!(Permission::READ_WRITE, Permission::READ | Permission::WRITE);
        assert_eq!(
            Permission::FULL,
            Permission::READ | Permission::WRITE | Permission::EXECUTE
        );
        assert!(Permission::FULL.contains(Permission::READ_EXECUTE));
        assert_eq!(Permission::READ_WRITE.to_string(), "READ+WRITE");
    }

    #[test]
    fn owner_gets_initial_rights() {
        let acl = ResourceRegistry::new();
        acl.register("task:poem:v1", "supervisor:main[1]:v1", Permission::READ_EXECUTE)
            .unwrap();
        assert!(acl.has("task:poem:v1", "supervisor:main[1]:v1", Permission::READ));
        assert!(acl.has("task:poem:v1", "supervisor:main[1]:v1", Permission::EXECUTE));
        assert!(!acl.has("task:poem:v1", "supervisor:main[1]:v1", Permission::WRITE));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let acl = ResourceRegistry::new();
        acl.register("r", "o", Permission::FULL).unwrap();
        assert!(matches!(
            acl.register("r", "o", Permission::FULL),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn grants_accumulate() {
        let acl = ResourceRegistry::new();
        acl.register("r", "owner", Permission::FULL).unwrap();
        acl.grant("r", "other", Permission::READ).unwrap();
        acl.grant("r", "other", Permission::EXECUTE).unwrap();
        assert!(acl.has("r", "other", Permission::READ_EXECUTE));
        assert!(!acl.has("r", "other", Permission::WRITE));
    }

    #[test]
    fn check_failure_carries_details() {
        let acl = ResourceRegistry::new();
        acl.register("r", "owner", Permission::READ).unwrap();
        let err = acl.check("r", "stranger", Permission::WRITE).unwrap_err();
        match err {
            Error::PermissionDenied {
                resource,
                principal,
                required,
            } => {
                assert_eq!(resource, "r");
                assert_eq!(principal, "stranger");
                assert_eq!(required, "WRITE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn remove_drops_all_principal_entries() {
        let acl = ResourceRegistry::new();
        acl.register("r", "owner", Permission::FULL).unwrap();
        acl.grant("r", "other", Permission::READ).unwrap();
        acl.remove("r").unwrap();
        assert!(!acl.contains("r"));
        assert!(matches!(
            acl.check("r", "owner", Permission::READ),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(acl.remove("r"), Err(Error::NotFound(_))));
    }
}
