pub mod adapter;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use adapter::LocalSubmissionAdapter;
pub use connection::{connect, connect_config, connect_with_settings, DbPool};
pub use repositories::{
    AuditRepository, InMemoryRequestRepository, InsertOutcome, NewRequest, RepositoryError,
    RequestRepository, SqlAuditRepository, SqlRequestRepository, StoredRequest,
};
