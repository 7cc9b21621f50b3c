//! Page (route) permission configuration.
//!
//! Maps console routes to the permissions needed to open them. Routes may
//! contain `:param` segments that match any single path segment; an exact
//! route always wins over a pattern. A path with no entry is not gated.

use crate::permission::Permission;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a page's required permissions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one permission is required.
    #[default]
    Any,
    /// Every permission is required.
    All,
}

/// Permission requirement for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePermissionConfig {
    /// Route pattern, e.g. `/instances/:id`.
    pub route: String,
    /// Permissions checked for the route.
    pub required: Vec<Permission>,
    /// How `required` is combined.
    #[serde(default)]
    pub mode: MatchMode,
}

impl PagePermissionConfig {
    /// Creates a rule for a route.
    #[must_use]
    pub fn new(route: impl Into<String>, required: Vec<Permission>, mode: MatchMode) -> Self {
        Self {
            route: normalize_path(&route.into()),
            required,
            mode,
        }
    }

    fn is_pattern(&self) -> bool {
        self.route.split('/').any(|segment| segment.starts_with(':'))
    }

    fn matches(&self, path: &str) -> bool {
        let mut route_segments = self.route.split('/');
        let mut path_segments = path.split('/');
        loop {
            match (route_segments.next(), path_segments.next()) {
                (None, None) => return true,
                (Some(route), Some(segment)) => {
                    let wildcard = route.starts_with(':') && !segment.is_empty();
                    if !wildcard && route != segment {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// Lookup table from routes to permission requirements.
#[derive(Debug, Clone, Default)]
pub struct PagePermissionTable {
    exact: HashMap<String, PagePermissionConfig>,
    patterns: Vec<PagePermissionConfig>,
}

impl PagePermissionTable {
    /// Creates an empty table; every page is allowed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule, replacing any previous rule for the same route.
    pub fn insert(&mut self, rule: PagePermissionConfig) {
        if rule.is_pattern() {
            self.patterns.retain(|existing| existing.route != rule.route);
            self.patterns.push(rule);
        } else {
            self.exact.insert(rule.route.clone(), rule);
        }
    }

    /// Adds a rule (builder form).
    #[must_use]
    pub fn with_rule(
        mut self,
        route: &str,
        required: impl Into<Vec<Permission>>,
        mode: MatchMode,
    ) -> Self {
        self.insert(PagePermissionConfig::new(route, required.into(), mode));
        self
    }

    /// Finds the rule governing a path.
    ///
    /// Exact routes are checked first, then patterns in insertion order.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&PagePermissionConfig> {
        let path = normalize_path(path);
        self.exact
            .get(&path)
            .or_else(|| self.patterns.iter().find(|rule| rule.matches(&path)))
    }

    /// Returns the number of rules in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    /// Returns true if the table holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The console's route table.
    ///
    /// Routes such as `/profile`, `/help` and `/announcements` are deliberately
    /// absent and therefore open to every session.
    #[must_use]
    pub fn console_default() -> Self {
        use crate::page::MatchMode::{All, Any};
        use crate::permission::Permission::*;

        Self::new()
            .with_rule("/dashboard", [ViewDashboard], Any)
            .with_rule("/instances", [ViewInstances], Any)
            .with_rule("/instances/:id", [ViewInstances], Any)
            .with_rule("/instances/:id/terminal", [ViewInstances, ConnectInstances], All)
            .with_rule("/training-jobs", [ViewTrainingJobs], Any)
            .with_rule("/training-jobs/:id", [ViewTrainingJobs], Any)
            .with_rule("/inference", [ViewInferenceServices], Any)
            .with_rule("/notebooks", [ViewNotebooks], Any)
            .with_rule("/datasets", [ViewDatasets], Any)
            .with_rule("/datasets/upload", [ManageOwnDatasets, UploadFiles], All)
            .with_rule("/models", [ViewModels], Any)
            .with_rule("/images", [ViewImages], Any)
            .with_rule("/storage", [ViewStorageVolumes], Any)
            .with_rule("/pipelines", [ViewPipelines], Any)
            .with_rule("/experiments", [ViewExperiments], Any)
            .with_rule("/marketplace", [ViewMarketplace], Any)
            .with_rule("/tickets", [ViewTickets], Any)
            .with_rule("/api-keys", [ViewApiKeys], Any)
            .with_rule("/billing", [ViewBilling, ViewInvoices], Any)
            .with_rule("/ops/gpu-pools", [ViewGpuPools], Any)
            .with_rule("/ops/nodes", [ViewNodes], Any)
            .with_rule("/ops/nodes/:id", [ViewNodes], Any)
            .with_rule("/ops/clusters", [ViewClusters], Any)
            .with_rule("/ops/queues", [ViewQueues], Any)
            .with_rule("/ops/alerts", [ViewAlerts], Any)
            .with_rule("/ops/monitoring", [ViewMetrics, ViewLogs], Any)
            .with_rule("/ops/maintenance", [ManageMaintenance], Any)
            .with_rule("/admin/users", [ViewUsers], Any)
            .with_rule("/admin/users/new", [CreateUsers, ManageUsers], All)
            .with_rule("/admin/users/:id", [ViewUsers], Any)
            .with_rule("/admin/roles", [ViewRoles, ManageRoles], All)
            .with_rule("/admin/organizations", [ViewOrganizations], Any)
            .with_rule("/admin/teams", [ViewTeams], Any)
            .with_rule("/admin/quotas", [ManageQuotas], Any)
            .with_rule("/admin/audit-logs", [ViewAuditLogs], Any)
            .with_rule("/admin/security", [ViewSecurityPolicies, ManageSecurityPolicies], All)
            .with_rule("/admin/settings", [ViewSettings, ManageSettings], All)
    }
}

/// Normalizes a request path for lookup.
///
/// Drops the query string and fragment, collapses a trailing slash and
/// guarantees a leading one.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_query_fragment_and_trailing_slash() {
        assert_eq!(normalize_path("/instances/?page=2"), "/instances");
        assert_eq!(normalize_path("instances#top"), "/instances");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn exact_route_wins_over_pattern() {
        let table = PagePermissionTable::console_default();
        let rule = table.lookup("/admin/users/new").expect("rule");
        assert_eq!(rule.route, "/admin/users/new");
        assert_eq!(rule.mode, MatchMode::All);
    }

    #[test]
    fn pattern_matches_single_segment() {
        let table = PagePermissionTable::console_default();
        let rule = table.lookup("/instances/i-42").expect("rule");
        assert_eq!(rule.route, "/instances/:id");

        let terminal = table.lookup("/instances/i-42/terminal").expect("rule");
        assert_eq!(terminal.required, vec![Permission::ViewInstances, Permission::ConnectInstances]);

        assert!(table.lookup("/instances/i-42/logs").is_none());
    }

    #[test]
    fn unlisted_routes_have_no_rule() {
        let table = PagePermissionTable::console_default();
        assert!(table.lookup("/profile").is_none());
        assert!(table.lookup("/help").is_none());
    }

    #[test]
    fn insert_replaces_existing_rule() {
        let mut table = PagePermissionTable::new().with_rule(
            "/reports",
            [Permission::ViewBilling],
            MatchMode::Any,
        );
        table.insert(PagePermissionConfig::new(
            "/reports/",
            vec![Permission::ExportBilling],
            MatchMode::Any,
        ));

        assert_eq!(table.len(), 1);
        let rule = table.lookup("/reports").expect("rule");
        assert_eq!(rule.required, vec![Permission::ExportBilling]);
    }

    #[test]
    fn match_mode_deserializes_lowercase() {
        let rule: PagePermissionConfig = serde_json::from_str(
            r#"{"route": "/ops/nodes", "required": ["view_nodes", "manage_nodes"], "mode": "all"}"#,
        )
        .expect("deserialize");
        assert_eq!(rule.mode, MatchMode::All);
        assert_eq!(rule.required.len(), 2);
    }
}
