pub mod auth;
pub mod project;

pub use auth::{identity_middleware, AuthUser};
pub use project::{project_scope_middleware, ProjectScope};
