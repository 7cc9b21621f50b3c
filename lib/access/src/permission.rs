//! Permission catalogue and permission sets.
//!
//! Every capability the console can gate on is a variant of [`Permission`].
//! Resource kinds that carry an owner are listed in [`ResourceType`], which
//! maps each kind to its `view_*`, `manage_own_*` and `manage_all_*` tokens.

use crate::error::AccessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generates the closed `Permission` enumeration with its wire names.
macro_rules! define_permissions {
    ($( $(#[$meta:meta])* $variant:ident => $name:literal, )+) => {
        /// A fine-grained capability token.
        ///
        /// Serialized using its `snake_case` wire name (e.g. `manage_own_instances`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Permission {
            $(
                $(#[$meta])*
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl Permission {
            /// Every permission, in declaration order.
            pub const ALL: &'static [Permission] = &[$(Self::$variant,)+];

            /// Returns the wire name of this permission.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for Permission {
            type Err = AccessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(AccessError::UnknownPermission {
                        name: other.to_string(),
                    }),
                }
            }
        }
    };
}

define_permissions! {
    /// Open the landing dashboard.
    ViewDashboard => "view_dashboard",

    ViewInstances => "view_instances",
    ManageOwnInstances => "manage_own_instances",
    ManageAllInstances => "manage_all_instances",
    /// Open a terminal or SSH session on a running instance.
    ConnectInstances => "connect_instances",

    ViewTrainingJobs => "view_training_jobs",
    ManageOwnTrainingJobs => "manage_own_training_jobs",
    ManageAllTrainingJobs => "manage_all_training_jobs",

    ViewInferenceServices => "view_inference_services",
    ManageOwnInferenceServices => "manage_own_inference_services",
    ManageAllInferenceServices => "manage_all_inference_services",

    ViewNotebooks => "view_notebooks",
    ManageOwnNotebooks => "manage_own_notebooks",
    ManageAllNotebooks => "manage_all_notebooks",

    ViewDatasets => "view_datasets",
    ManageOwnDatasets => "manage_own_datasets",
    ManageAllDatasets => "manage_all_datasets",
    /// Upload files into datasets and storage volumes.
    UploadFiles => "upload_files",

    ViewModels => "view_models",
    ManageOwnModels => "manage_own_models",
    ManageAllModels => "manage_all_models",

    ViewImages => "view_images",
    ManageOwnImages => "manage_own_images",
    ManageAllImages => "manage_all_images",

    ViewStorageVolumes => "view_storage_volumes",
    ManageOwnStorageVolumes => "manage_own_storage_volumes",
    ManageAllStorageVolumes => "manage_all_storage_volumes",

    ViewApiKeys => "view_api_keys",
    ManageOwnApiKeys => "manage_own_api_keys",
    ManageAllApiKeys => "manage_all_api_keys",

    ViewProjects => "view_projects",
    ManageOwnProjects => "manage_own_projects",
    ManageAllProjects => "manage_all_projects",

    ViewPipelines => "view_pipelines",
    ManageOwnPipelines => "manage_own_pipelines",
    ManageAllPipelines => "manage_all_pipelines",

    ViewExperiments => "view_experiments",
    ManageOwnExperiments => "manage_own_experiments",
    ManageAllExperiments => "manage_all_experiments",

    ViewTemplates => "view_templates",
    ManageOwnTemplates => "manage_own_templates",
    ManageAllTemplates => "manage_all_templates",

    ViewTickets => "view_tickets",
    ManageOwnTickets => "manage_own_tickets",
    ManageAllTickets => "manage_all_tickets",

    ViewReservations => "view_reservations",
    ManageOwnReservations => "manage_own_reservations",
    ManageAllReservations => "manage_all_reservations",

    ViewSnapshots => "view_snapshots",
    ManageOwnSnapshots => "manage_own_snapshots",
    ManageAllSnapshots => "manage_all_snapshots",

    ViewGpuPools => "view_gpu_pools",
    ManageGpuPools => "manage_gpu_pools",

    ViewNodes => "view_nodes",
    ManageNodes => "manage_nodes",
    /// Cordon and drain a node ahead of maintenance.
    DrainNodes => "drain_nodes",

    ViewClusters => "view_clusters",
    ManageClusters => "manage_clusters",

    ViewQueues => "view_queues",
    ManageQueues => "manage_queues",

    ViewQuotas => "view_quotas",
    ManageQuotas => "manage_quotas",

    ViewUsers => "view_users",
    CreateUsers => "create_users",
    ManageUsers => "manage_users",
    DisableUsers => "disable_users",

    ViewRoles => "view_roles",
    ManageRoles => "manage_roles",

    ViewOrganizations => "view_organizations",
    ManageOrganizations => "manage_organizations",

    ViewTeams => "view_teams",
    ManageTeams => "manage_teams",

    ViewBilling => "view_billing",
    ManageBilling => "manage_billing",
    ExportBilling => "export_billing",
    ViewInvoices => "view_invoices",

    ViewMetrics => "view_metrics",
    ViewLogs => "view_logs",
    ExportLogs => "export_logs",

    ViewAlerts => "view_alerts",
    ManageAlerts => "manage_alerts",
    AcknowledgeAlerts => "acknowledge_alerts",

    ViewAuditLogs => "view_audit_logs",
    ExportAuditLogs => "export_audit_logs",

    ViewSettings => "view_settings",
    ManageSettings => "manage_settings",

    ViewNetworks => "view_networks",
    ManageNetworks => "manage_networks",

    ViewSecurityPolicies => "view_security_policies",
    ManageSecurityPolicies => "manage_security_policies",

    ViewRegistry => "view_registry",
    ManageRegistry => "manage_registry",

    ViewMarketplace => "view_marketplace",
    PublishMarketplace => "publish_marketplace",

    ViewAnnouncements => "view_announcements",
    ManageAnnouncements => "manage_announcements",

    ViewSystemStatus => "view_system_status",
    /// Schedule and run platform maintenance windows.
    ManageMaintenance => "manage_maintenance",
}

// PermissionSet stores one bit per variant.
const _: () = assert!(Permission::ALL.len() <= 128);

impl Permission {
    const fn bit(self) -> u128 {
        1u128 << (self as u8)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of permissions.
///
/// Union is the only combining operation the role model needs; iteration
/// yields permissions in declaration order regardless of insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PermissionSet {
    bits: u128,
}

impl PermissionSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Creates a set from a slice of permissions.
    #[must_use]
    pub const fn from_slice(permissions: &[Permission]) -> Self {
        let mut bits = 0u128;
        let mut i = 0;
        while i < permissions.len() {
            bits |= permissions[i].bit();
            i += 1;
        }
        Self { bits }
    }

    /// Adds a permission to the set.
    pub fn insert(&mut self, permission: Permission) {
        self.bits |= permission.bit();
    }

    /// Returns true if the set contains the permission.
    #[must_use]
    pub const fn contains(&self, permission: Permission) -> bool {
        self.bits & permission.bit() != 0
    }

    /// Returns the union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Returns true if every permission in `self` is also in `other`.
    #[must_use]
    pub const fn is_subset(&self, other: &Self) -> bool {
        self.bits & !other.bits == 0
    }

    /// Returns true if the set holds no permissions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns the number of permissions in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterates the permissions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL
            .iter()
            .copied()
            .filter(|permission| self.contains(*permission))
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::empty();
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        for permission in iter {
            self.insert(permission);
        }
    }
}

/// Generates the `ResourceType` enumeration and its permission triples.
macro_rules! define_resource_types {
    ($( $(#[$meta:meta])* $variant:ident => $name:literal {
        view: $view:ident, own: $own:ident, all: $all:ident $(,)?
    }, )+) => {
        /// A kind of resource whose records carry an owner.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ResourceType {
            $(
                $(#[$meta])*
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl ResourceType {
            /// Every resource type, in declaration order.
            pub const ALL: &'static [ResourceType] = &[$(Self::$variant,)+];

            /// Returns the wire name used by resource backends.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Permission required to list and inspect records of this type.
            #[must_use]
            pub const fn view(self) -> Permission {
                match self {
                    $(Self::$variant => Permission::$view,)+
                }
            }

            /// Permission to act on records owned by the current user.
            #[must_use]
            pub const fn manage_own(self) -> Permission {
                match self {
                    $(Self::$variant => Permission::$own,)+
                }
            }

            /// Permission to act on any record regardless of owner.
            #[must_use]
            pub const fn manage_all(self) -> Permission {
                match self {
                    $(Self::$variant => Permission::$all,)+
                }
            }
        }

        impl FromStr for ResourceType {
            type Err = AccessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(AccessError::UnknownResourceType {
                        name: other.to_string(),
                    }),
                }
            }
        }
    };
}

define_resource_types! {
    Instances => "instances" {
        view: ViewInstances, own: ManageOwnInstances, all: ManageAllInstances,
    },
    TrainingJobs => "training_jobs" {
        view: ViewTrainingJobs, own: ManageOwnTrainingJobs, all: ManageAllTrainingJobs,
    },
    InferenceServices => "inference_services" {
        view: ViewInferenceServices, own: ManageOwnInferenceServices, all: ManageAllInferenceServices,
    },
    Notebooks => "notebooks" {
        view: ViewNotebooks, own: ManageOwnNotebooks, all: ManageAllNotebooks,
    },
    Datasets => "datasets" {
        view: ViewDatasets, own: ManageOwnDatasets, all: ManageAllDatasets,
    },
    Models => "models" {
        view: ViewModels, own: ManageOwnModels, all: ManageAllModels,
    },
    Images => "images" {
        view: ViewImages, own: ManageOwnImages, all: ManageAllImages,
    },
    StorageVolumes => "storage_volumes" {
        view: ViewStorageVolumes, own: ManageOwnStorageVolumes, all: ManageAllStorageVolumes,
    },
    ApiKeys => "api_keys" {
        view: ViewApiKeys, own: ManageOwnApiKeys, all: ManageAllApiKeys,
    },
    Projects => "projects" {
        view: ViewProjects, own: ManageOwnProjects, all: ManageAllProjects,
    },
    Pipelines => "pipelines" {
        view: ViewPipelines, own: ManageOwnPipelines, all: ManageAllPipelines,
    },
    Experiments => "experiments" {
        view: ViewExperiments, own: ManageOwnExperiments, all: ManageAllExperiments,
    },
    Templates => "templates" {
        view: ViewTemplates, own: ManageOwnTemplates, all: ManageAllTemplates,
    },
    Tickets => "tickets" {
        view: ViewTickets, own: ManageOwnTickets, all: ManageAllTickets,
    },
    Reservations => "reservations" {
        view: ViewReservations, own: ManageOwnReservations, all: ManageAllReservations,
    },
    Snapshots => "snapshots" {
        view: ViewSnapshots, own: ManageOwnSnapshots, all: ManageAllSnapshots,
    },
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
