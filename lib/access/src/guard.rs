//! Page and resource authorization.
//!
//! [`AccessGuard`] evaluates whether the current session may open a page or
//! act on a resource record. It never renders anything: callers get a
//! boolean, or a [`PageDecision`] they can map onto a [`DenialPolicy`] to
//! choose between omitting content, showing a fallback or redirecting.

use crate::page::{MatchMode, PagePermissionTable, normalize_path};
use crate::permission::{Permission, ResourceType};
use crate::resolver::PermissionResolver;
use crate::user::User;
use gpu_console_core::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the presentation layer does with denied content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "to", rename_all = "snake_case")]
pub enum DenialPolicy {
    /// Leave the content out without notice.
    #[default]
    Omit,
    /// Render the caller's fallback content instead.
    Fallback,
    /// Navigate elsewhere.
    Redirect(String),
}

/// Presentation instruction produced from a decision and a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "to", rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Access granted; render the content.
    Render,
    /// Access denied; render nothing.
    Omit,
    /// Access denied; render fallback content.
    Fallback,
    /// Access denied; redirect to the given path.
    Redirect(String),
}

/// Outcome of a page check with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDecision {
    /// Normalized path that was checked.
    pub path: String,
    /// Whether the page may be opened.
    pub allowed: bool,
    /// Route of the matching rule, or `None` when the page is ungated.
    pub route: Option<String>,
    /// Permissions the rule requires.
    pub required: Vec<Permission>,
    /// How the rule combines `required`.
    pub mode: MatchMode,
}

impl PageDecision {
    /// Maps this decision onto a presentation instruction.
    #[must_use]
    pub fn apply(&self, policy: &DenialPolicy) -> GuardOutcome {
        if self.allowed {
            return GuardOutcome::Render;
        }
        match policy {
            DenialPolicy::Omit => GuardOutcome::Omit,
            DenialPolicy::Fallback => GuardOutcome::Fallback,
            DenialPolicy::Redirect(to) => GuardOutcome::Redirect(to.clone()),
        }
    }
}

/// Evaluates page and resource authorization for one session snapshot.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    resolver: PermissionResolver,
    user_id: Option<UserId>,
    pages: Arc<PagePermissionTable>,
}

impl AccessGuard {
    /// Creates a guard from a resolved permission set and the current user ID.
    #[must_use]
    pub fn new(
        resolver: PermissionResolver,
        user_id: Option<UserId>,
        pages: Arc<PagePermissionTable>,
    ) -> Self {
        Self {
            resolver,
            user_id,
            pages,
        }
    }

    /// Creates a guard for the given user (or an anonymous one).
    #[must_use]
    pub fn for_user(user: Option<&User>, pages: Arc<PagePermissionTable>) -> Self {
        Self::new(
            PermissionResolver::for_user(user),
            user.map(|u| u.id().clone()),
            pages,
        )
    }

    /// Returns the resolver backing this guard.
    #[must_use]
    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Returns the ID of the user the guard evaluates for.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Returns true if the page may be opened.
    ///
    /// Pages without a configured rule are allowed.
    #[must_use]
    pub fn evaluate_page(&self, path: &str) -> bool {
        self.check_page(path).allowed
    }

    /// Evaluates a page and reports which rule decided it.
    #[must_use]
    pub fn check_page(&self, path: &str) -> PageDecision {
        let normalized = normalize_path(path);
        let Some(rule) = self.pages.lookup(&normalized) else {
            debug!(path = %normalized, "no page rule; allowing");
            return PageDecision {
                path: normalized,
                allowed: true,
                route: None,
                required: Vec::new(),
                mode: MatchMode::Any,
            };
        };

        let allowed = match rule.mode {
            MatchMode::Any => self.resolver.has_any(&rule.required),
            MatchMode::All => self.resolver.has_all(&rule.required),
        };
        debug!(path = %normalized, route = %rule.route, allowed, "page check");

        PageDecision {
            path: normalized,
            allowed,
            route: Some(rule.route.clone()),
            required: rule.required.clone(),
            mode: rule.mode,
        }
    }

    /// Returns true if the current user may act on a record of the given type.
    ///
    /// Holders of the type's manage-all permission may act on any record;
    /// otherwise the record must be owned by the current user and the user
    /// must hold the manage-own permission.
    #[must_use]
    pub fn evaluate_resource(&self, resource_type: ResourceType, owner_id: &str) -> bool {
        if self.resolver.has_permission(resource_type.manage_all()) {
            return true;
        }
        let is_owner = self
            .user_id
            .as_ref()
            .is_some_and(|id| id.as_str() == owner_id);
        let allowed = is_owner && self.resolver.has_permission(resource_type.manage_own());
        debug!(%resource_type, owner_id, is_owner, allowed, "resource check");
        allowed
    }

    /// Like [`Self::evaluate_resource`] for a resource type given by name.
    ///
    /// Unknown resource types are denied.
    #[must_use]
    pub fn evaluate_resource_named(&self, resource_type: &str, owner_id: &str) -> bool {
        match resource_type.parse::<ResourceType>() {
            Ok(resource_type) => self.evaluate_resource(resource_type, owner_id),
            Err(err) => {
                warn!(resource_type, error = %err, "denying check on unknown resource type");
                false
            }
        }
    }
}
