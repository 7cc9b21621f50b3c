//! Error types for the access crate.
//!
//! Permission checks themselves never fail: they answer with a boolean.
//! These errors only arise when loosely-typed names (from a provider, a
//! query string or a config file) are parsed into the closed enumerations.

use std::fmt;

/// Errors from parsing access-control identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The role name is not one of the known roles.
    UnknownRole { name: String },
    /// The permission name is not in the catalogue.
    UnknownPermission { name: String },
    /// The resource type does not carry ownership permissions.
    UnknownResourceType { name: String },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRole { name } => {
                write!(f, "unknown role: {name}")
            }
            Self::UnknownPermission { name } => {
                write!(f, "unknown permission: {name}")
            }
            Self::UnknownResourceType { name } => {
                write!(f, "unknown resource type: {name}")
            }
        }
    }
}

impl std::error::Error for AccessError {}
