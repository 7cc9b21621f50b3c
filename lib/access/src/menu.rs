//! Navigation menu filtering.
//!
//! The console's side navigation is a list of groups, each holding items.
//! Items and groups may declare required permissions; [`MenuFilter`] removes
//! what the current session may not see while keeping the original order.

use crate::permission::Permission;
use crate::resolver::PermissionResolver;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A navigable entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    /// Stable identifier.
    pub id: String,
    /// Label shown in the navigation.
    pub label: String,
    /// Route opened by the entry.
    pub path: String,
    /// Permissions of which at least one is needed; empty means visible to all.
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
}

impl MenuItem {
    /// Creates an item.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        path: impl Into<String>,
        required_permissions: impl Into<Vec<Permission>>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            path: path.into(),
            required_permissions: required_permissions.into(),
        }
    }
}

/// A titled group of navigation entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuGroup {
    /// Stable identifier.
    pub id: String,
    /// Group heading.
    pub label: String,
    /// Group-level gate, checked in addition to the item gates.
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    /// Entries of the group, in display order.
    pub items: Vec<MenuItem>,
}

impl MenuGroup {
    /// Creates a group without a group-level gate.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, items: Vec<MenuItem>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            required_permissions: Vec::new(),
            items,
        }
    }

    /// Sets the group-level gate.
    #[must_use]
    pub fn gated_by(mut self, required_permissions: impl Into<Vec<Permission>>) -> Self {
        self.required_permissions = required_permissions.into();
        self
    }
}

/// The full navigation tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Menu {
    groups: Vec<MenuGroup>,
}

impl Menu {
    /// Creates a menu from groups in display order.
    #[must_use]
    pub fn new(groups: Vec<MenuGroup>) -> Self {
        Self { groups }
    }

    /// Returns the groups.
    #[must_use]
    pub fn groups(&self) -> &[MenuGroup] {
        &self.groups
    }

    /// Iterates every item across all groups, in display order.
    pub fn items(&self) -> impl Iterator<Item = &MenuItem> {
        self.groups.iter().flat_map(|group| group.items.iter())
    }

    /// The console's navigation tree.
    ///
    /// Profile, Announcements and Help ship without a permission list and
    /// are shown to every session.
    #[must_use]
    pub fn console_default() -> Self {
        use crate::permission::Permission::*;

        Self::new(vec![
            MenuGroup::new(
                "workspace",
                "Workspace",
                vec![
                    MenuItem::new("dashboard", "Dashboard", "/dashboard", [ViewDashboard]),
                    MenuItem::new("instances", "Instances", "/instances", [ViewInstances]),
                    MenuItem::new("notebooks", "Notebooks", "/notebooks", [ViewNotebooks]),
                    MenuItem::new(
                        "training-jobs",
                        "Training Jobs",
                        "/training-jobs",
                        [ViewTrainingJobs],
                    ),
                    MenuItem::new(
                        "inference",
                        "Inference Services",
                        "/inference",
                        [ViewInferenceServices],
                    ),
                    MenuItem::new("pipelines", "Pipelines", "/pipelines", [ViewPipelines]),
                    MenuItem::new(
                        "experiments",
                        "Experiments",
                        "/experiments",
                        [ViewExperiments],
                    ),
                ],
            ),
            MenuGroup::new(
                "assets",
                "Data & Models",
                vec![
                    MenuItem::new("datasets", "Datasets", "/datasets", [ViewDatasets]),
                    MenuItem::new("models", "Models", "/models", [ViewModels]),
                    MenuItem::new("images", "Images", "/images", [ViewImages]),
                    MenuItem::new("storage", "Storage", "/storage", [ViewStorageVolumes]),
                    MenuItem::new(
                        "marketplace",
                        "Marketplace",
                        "/marketplace",
                        [ViewMarketplace],
                    ),
                ],
            ),
            MenuGroup::new(
                "operations",
                "Operations",
                vec![
                    MenuItem::new("gpu-pools", "GPU Pools", "/ops/gpu-pools", [ViewGpuPools]),
                    MenuItem::new("nodes", "Nodes", "/ops/nodes", [ViewNodes]),
                    MenuItem::new("clusters", "Clusters", "/ops/clusters", [ViewClusters]),
                    MenuItem::new("queues", "Queues", "/ops/queues", [ViewQueues]),
                    MenuItem::new("alerts", "Alerts", "/ops/alerts", [ViewAlerts]),
                    MenuItem::new(
                        "monitoring",
                        "Monitoring",
                        "/ops/monitoring",
                        [ViewMetrics, ViewLogs],
                    ),
                ],
            )
            .gated_by([ViewNodes, ViewClusters, ViewSystemStatus]),
            MenuGroup::new(
                "administration",
                "Administration",
                vec![
                    MenuItem::new("users", "Users", "/admin/users", [ViewUsers]),
                    MenuItem::new("roles", "Roles", "/admin/roles", [ViewRoles]),
                    MenuItem::new(
                        "organizations",
                        "Organizations",
                        "/admin/organizations",
                        [ViewOrganizations],
                    ),
                    MenuItem::new("quotas", "Quotas", "/admin/quotas", [ManageQuotas]),
                    MenuItem::new(
                        "audit-logs",
                        "Audit Logs",
                        "/admin/audit-logs",
                        [ViewAuditLogs],
                    ),
                    MenuItem::new("settings", "Settings", "/admin/settings", [ViewSettings]),
                ],
            )
            .gated_by([ManageUsers, ManageRoles, ManageSettings]),
            MenuGroup::new(
                "account",
                "Account",
                vec![
                    MenuItem::new("profile", "Profile", "/profile", []),
                    MenuItem::new("api-keys", "API Keys", "/api-keys", [ViewApiKeys]),
                    MenuItem::new("billing", "Billing", "/billing", [ViewBilling, ViewInvoices]),
                    MenuItem::new("tickets", "Support Tickets", "/tickets", [ViewTickets]),
                    MenuItem::new("announcements", "Announcements", "/announcements", []),
                    MenuItem::new("help", "Help", "/help", []),
                ],
            ),
        ])
    }
}

/// Filters a navigation tree down to what a session may see.
#[derive(Debug, Clone, Copy)]
pub struct MenuFilter<'a> {
    resolver: &'a PermissionResolver,
}

impl<'a> MenuFilter<'a> {
    /// Creates a filter for the given resolver.
    #[must_use]
    pub fn new(resolver: &'a PermissionResolver) -> Self {
        Self { resolver }
    }

    /// Returns the visible part of `menu`.
    ///
    /// Items whose requirements fail are dropped; a group is dropped when it
    /// has no visible items left or when its own gate fails. Order is kept.
    #[must_use]
    pub fn filter(&self, menu: &Menu) -> Menu {
        let groups = menu
            .groups
            .iter()
            .filter(|group| self.resolver.has_any(&group.required_permissions))
            .filter_map(|group| {
                let items: Vec<MenuItem> = group
                    .items
                    .iter()
                    .filter(|item| self.resolver.has_any(&item.required_permissions))
                    .cloned()
                    .collect();
                if items.is_empty() {
                    debug!(group = %group.id, "dropping empty menu group");
                    return None;
                }
                Some(MenuGroup {
                    items,
                    ..group.clone()
                })
            })
            .collect();
        Menu { groups }
    }
}
