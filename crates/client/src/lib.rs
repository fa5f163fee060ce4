//! Hosted backend collaborator: the signed-in session and the REST
//! submission adapter.

pub mod auth;
pub mod rest;

pub use auth::{AuthSession, SessionStore};
pub use rest::{classify_status, ClientError, RestSubmissionAdapter};
