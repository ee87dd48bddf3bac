//! Git CLI adapter for the source collaborator.

pub mod auth;
pub mod parse;
pub mod repository;

pub use auth::GitAuth;
pub use repository::GitSource;
