//! Access control for the GPU console.
//!
//! This crate provides:
//! - The closed `Permission` catalogue and the static role-to-permission map
//! - `User`, `Role` and `RoleSet`
//! - `PermissionResolver`: pure permission checks for a role set
//! - `AccessGuard`: page (route) and per-resource authorization
//! - `MenuFilter`: navigation filtering
//!
//! Nothing in this crate performs I/O. Every decision is a function of the
//! roles and user ID it was built from, so callers can check permissions as
//! often as they like.
//!
//! # Example
//!
//! ```
//! use gpu_console_access::{
//!     AccessGuard, Menu, MenuFilter, PagePermissionTable, Permission, PermissionResolver,
//!     Role, RoleSet, User,
//! };
//! use std::sync::Arc;
//!
//! let user = User::new("u-42", "alice").with_roles(RoleSet::new([Role::User]));
//!
//! let resolver = PermissionResolver::for_user(Some(&user));
//! assert!(resolver.has_permission(Permission::ManageOwnInstances));
//! assert!(resolver.has_any(&[]));
//!
//! let guard = AccessGuard::for_user(Some(&user), Arc::new(PagePermissionTable::console_default()));
//! assert!(guard.evaluate_page("/instances"));
//! assert!(guard.evaluate_resource_named("instances", "u-42"));
//! assert!(!guard.evaluate_resource_named("instances", "someone-else"));
//!
//! let menu = MenuFilter::new(&resolver).filter(&Menu::console_default());
//! assert!(menu.items().any(|item| item.path == "/instances"));
//! ```

pub mod error;
pub mod guard;
pub mod menu;
pub mod page;
pub mod permission;
pub mod resolver;
pub mod role;
pub mod user;

// Re-export main types at crate root
pub use error::AccessError;
pub use guard::{AccessGuard, DenialPolicy, GuardOutcome, PageDecision};
pub use menu::{Menu, MenuFilter, MenuGroup, MenuItem};
pub use page::{MatchMode, PagePermissionConfig, PagePermissionTable, normalize_path};
pub use permission::{Permission, PermissionSet, ResourceType};
pub use resolver::PermissionResolver;
pub use role::{Role, RoleSet};
pub use user::{Organization, User};
