//! Permission resolution.
//!
//! [`PermissionResolver`] turns a role set into an effective permission set
//! once, then answers membership questions against it. It performs no I/O:
//! the answer depends only on the roles it was built from.
//!
//! # Open access for empty requirement lists
//!
//! [`PermissionResolver::has_any`] and [`PermissionResolver::has_all`] both
//! return `true` for an empty list. Pages and menu entries that declare no
//! required permissions are therefore visible to every session, including
//! anonymous ones. Several entries of the default navigation tree rely on
//! this; review any new entry that ships without a permission list.

use crate::permission::{Permission, PermissionSet};
use crate::role::RoleSet;
use crate::user::User;

/// Answers permission questions for one set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionResolver {
    permissions: PermissionSet,
}

impl PermissionResolver {
    /// Resolves the effective permissions of a role set.
    #[must_use]
    pub fn new(roles: &RoleSet) -> Self {
        Self {
            permissions: roles.permissions(),
        }
    }

    /// Wraps an already-resolved permission set.
    #[must_use]
    pub fn from_permissions(permissions: PermissionSet) -> Self {
        Self { permissions }
    }

    /// Resolver with no permissions, used for anonymous sessions.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            permissions: PermissionSet::empty(),
        }
    }

    /// Resolves the permissions of the given user, or none if there is no user.
    #[must_use]
    pub fn for_user(user: Option<&User>) -> Self {
        user.map_or_else(Self::anonymous, |user| Self::new(user.roles()))
    }

    /// Returns true if the permission is held.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Returns true if at least one of the permissions is held.
    ///
    /// Returns `true` for an empty list (open access).
    #[must_use]
    pub fn has_any(&self, permissions: &[Permission]) -> bool {
        permissions.is_empty() || permissions.iter().any(|p| self.has_permission(*p))
    }

    /// Returns true if every one of the permissions is held.
    ///
    /// Returns `true` for an empty list.
    #[must_use]
    pub fn has_all(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has_permission(*p))
    }

    /// Returns the resolved permission set.
    #[must_use]
    pub fn permissions(&self) -> PermissionSet {
        self.permissions
    }
}
