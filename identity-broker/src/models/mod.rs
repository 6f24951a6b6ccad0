//! Domain models shared by the broker, the registry and the event bus.

pub mod auth_provider;
pub mod client;
pub mod grant;
pub mod user;

pub use auth_provider::AuthProvider;
pub use client::{AuditMetadata, Client};
pub use grant::{AuthorizationGrant, PendingLogin, PkceChallenge, PkceMethod};
pub use user::{FederatedIdentity, User};
