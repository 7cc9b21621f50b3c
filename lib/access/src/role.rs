//! Roles and the static role-to-permission map.
//!
//! A user's effective permissions are the union of the permission sets of
//! every role they hold. The map below is the only place that decides what a
//! role grants.

use crate::error::AccessError;
use crate::permission::{Permission, PermissionSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Console role assigned by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform administrator; holds every permission.
    Admin,
    /// Standard user working with their own resources.
    User,
    /// User who also builds images, pipelines and experiments.
    Developer,
    /// Cluster operator managing nodes, pools and everyone's workloads.
    Operator,
}

use crate::permission::Permission::*;

const USER_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewInstances,
    ManageOwnInstances,
    ConnectInstances,
    ViewTrainingJobs,
    ManageOwnTrainingJobs,
    ViewInferenceServices,
    ManageOwnInferenceServices,
    ViewNotebooks,
    ManageOwnNotebooks,
    ViewDatasets,
    ManageOwnDatasets,
    UploadFiles,
    ViewModels,
    ManageOwnModels,
    ViewImages,
    ViewStorageVolumes,
    ManageOwnStorageVolumes,
    ViewApiKeys,
    ManageOwnApiKeys,
    ViewProjects,
    ViewTemplates,
    ViewTickets,
    ManageOwnTickets,
    ViewReservations,
    ManageOwnReservations,
    ViewSnapshots,
    ManageOwnSnapshots,
    ViewGpuPools,
    ViewQuotas,
    ViewBilling,
    ViewInvoices,
    ViewMarketplace,
    ViewAnnouncements,
];

const DEVELOPER_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewInstances,
    ManageOwnInstances,
    ConnectInstances,
    ViewTrainingJobs,
    ManageOwnTrainingJobs,
    ViewInferenceServices,
    ManageOwnInferenceServices,
    ViewNotebooks,
    ManageOwnNotebooks,
    ViewDatasets,
    ManageOwnDatasets,
    UploadFiles,
    ViewModels,
    ManageOwnModels,
    ViewImages,
    ManageOwnImages,
    ViewStorageVolumes,
    ManageOwnStorageVolumes,
    ViewApiKeys,
    ManageOwnApiKeys,
    ViewProjects,
    ManageOwnProjects,
    ViewPipelines,
    ManageOwnPipelines,
    ViewExperiments,
    ManageOwnExperiments,
    ViewTemplates,
    ManageOwnTemplates,
    ViewTickets,
    ManageOwnTickets,
    ViewReservations,
    ManageOwnReservations,
    ViewSnapshots,
    ManageOwnSnapshots,
    ViewGpuPools,
    ViewQuotas,
    ViewMetrics,
    ViewLogs,
    ViewRegistry,
    ManageRegistry,
    ViewMarketplace,
    PublishMarketplace,
    ViewAnnouncements,
];

const OPERATOR_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewInstances,
    ManageAllInstances,
    ConnectInstances,
    ViewTrainingJobs,
    ManageAllTrainingJobs,
    ViewInferenceServices,
    ManageAllInferenceServices,
    ViewNotebooks,
    ViewImages,
    ManageAllImages,
    ViewStorageVolumes,
    ManageAllStorageVolumes,
    ViewProjects,
    ViewTickets,
    ManageAllTickets,
    ViewReservations,
    ManageAllReservations,
    ViewSnapshots,
    ManageAllSnapshots,
    ViewGpuPools,
    ManageGpuPools,
    ViewNodes,
    ManageNodes,
    DrainNodes,
    ViewClusters,
    ManageClusters,
    ViewQueues,
    ManageQueues,
    ViewQuotas,
    ViewUsers,
    ViewMetrics,
    ViewLogs,
    ExportLogs,
    ViewAlerts,
    ManageAlerts,
    AcknowledgeAlerts,
    ViewAuditLogs,
    ViewNetworks,
    ManageNetworks,
    ViewSystemStatus,
    ManageMaintenance,
    ViewAnnouncements,
];

impl Role {
    /// Every role, in declaration order.
    pub const ALL: &'static [Role] = &[Self::Admin, Self::User, Self::Developer, Self::Operator];

    /// Returns the permissions this role grants.
    #[must_use]
    pub const fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Admin => Permission::ALL,
            Self::User => USER_PERMISSIONS,
            Self::Developer => DEVELOPER_PERMISSIONS,
            Self::Operator => OPERATOR_PERMISSIONS,
        }
    }

    /// Returns the permissions this role grants as a set.
    #[must_use]
    pub const fn permission_set(self) -> PermissionSet {
        PermissionSet::from_slice(self.permissions())
    }

    /// Returns the wire name of this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Developer => "developer",
            Self::Operator => "operator",
        }
    }

    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "developer" => Ok(Self::Developer),
            "operator" => Ok(Self::Operator),
            _ => Err(AccessError::UnknownRole {
                name: s.to_string(),
            }),
        }
    }
}

/// Set of roles held by a user.
///
/// Kept sorted and deduplicated, so two sets holding the same roles compare
/// equal no matter how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Role>", into = "Vec<Role>")]
pub struct RoleSet {
    roles: Vec<Role>,
}

impl RoleSet {
    /// Creates an empty role set (no access).
    #[must_use]
    pub fn none() -> Self {
        Self { roles: Vec::new() }
    }

    /// Creates a role set from the given roles.
    #[must_use]
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut roles: Vec<Role> = roles.into_iter().collect();
        roles.sort_unstable();
        roles.dedup();
        Self { roles }
    }

    /// Creates a role set from role names reported by the identity provider.
    ///
    /// Names that do not match a known role are skipped and logged.
    #[must_use]
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().filter_map(|name| {
            let name = name.as_ref();
            match name.parse::<Role>() {
                Ok(role) => Some(role),
                Err(err) => {
                    warn!(role = name, error = %err, "ignoring unrecognized role from provider");
                    None
                }
            }
        }))
    }

    /// Adds a role to the set.
    pub fn insert(&mut self, role: Role) {
        if let Err(pos) = self.roles.binary_search(&role) {
            self.roles.insert(pos, role);
        }
    }

    /// Returns true if the set contains the role.
    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.roles.binary_search(&role).is_ok()
    }

    /// Returns true if the user has admin access.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }

    /// Returns true if no roles are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Returns the roles as a slice.
    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Returns the union of the permissions granted by every held role.
    #[must_use]
    pub fn permissions(&self) -> PermissionSet {
        self.roles
            .iter()
            .fold(PermissionSet::empty(), |acc, role| {
                acc.union(role.permission_set())
            })
    }
}

impl From<Vec<Role>> for RoleSet {
    fn from(roles: Vec<Role>) -> Self {
        Self::new(roles)
    }
}

impl From<RoleSet> for Vec<Role> {
    fn from(set: RoleSet) -> Self {
        set.roles
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self::new(iter)
    }
}
