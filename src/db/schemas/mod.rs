//! MongoDB document schemas
//!
//! Tenants, dashboard login sessions, admin accounts and sessions, and the
//! message audit log.

mod admin;
mod login_session;
mod message_log;
mod metadata;
mod tenant;

pub use admin::{
    AdminSessionDoc, AdminUserDoc, ADMIN_SESSION_COLLECTION, ADMIN_USER_COLLECTION,
};
pub use login_session::{LoginSessionDoc, LOGIN_SESSION_COLLECTION};
pub use message_log::{MessageLogDoc, MESSAGE_LOG_COLLECTION};
pub use metadata::Metadata;
pub use tenant::{TenantDoc, TENANT_COLLECTION};
