pub mod request;

pub use request::{RecordId, RecordKind, RequestKind, SubmissionKey, UnknownKind};
