//! MongoDB persistence
//!
//! Typed collections over the `tenants`, `login_sessions`, `admin_users`,
//! `admin_sessions` and `message_logs` collections, and the store
//! implementations built on them.

pub mod admins;
pub mod audit;
pub mod mongo;
pub mod schemas;
pub mod tenants;

pub use admins::MongoAdminStore;
pub use audit::MongoAuditLog;
pub use mongo::{MongoClient, MongoCollection};
pub use schemas::{LoginSessionDoc, MessageLogDoc, Metadata, TenantDoc};
pub use tenants::MongoTenantStore;
