//! User domain type.
//!
//! A `User` is the profile the identity provider reports for an access token.
//! It is never edited locally; a changed profile arrives as a whole new value
//! when the session re-fetches it from the provider.

use crate::role::RoleSet;
use gpu_console_core::UserId;
use serde::{Deserialize, Serialize};

/// Organizational placement of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization (tenant) identifier.
    pub id: String,
    /// Human-readable organization name.
    pub name: String,
    /// Department within the organization, if any.
    #[serde(default)]
    pub department: Option<String>,
}

/// An authenticated console user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Provider-issued user ID; compared against resource owner IDs.
    id: UserId,
    /// Login name.
    username: String,
    /// Name shown in the console header.
    display_name: Option<String>,
    /// Email address, if the provider reports one.
    email: Option<String>,
    /// Roles granted to the user.
    #[serde(default)]
    roles: RoleSet,
    /// Organizational metadata.
    #[serde(default)]
    organization: Option<Organization>,
}

impl User {
    /// Creates a user with no roles and no optional metadata.
    #[must_use]
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            email: None,
            roles: RoleSet::none(),
            organization: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the roles.
    #[must_use]
    pub fn with_roles(mut self, roles: RoleSet) -> Self {
        self.roles = roles;
        self
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_organization(mut self, organization: Option<Organization>) -> Self {
        self.organization = organization;
        self
    }

    /// Returns the user's ID.
    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Returns the login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the display name, falling back to the login name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Returns the email address, if available.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the user's roles.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Returns the user's organization, if known.
    #[must_use]
    pub fn organization(&self) -> Option<&Organization> {
        self.organization.as_ref()
    }

    /// Returns true if the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.is_admin()
    }
}
