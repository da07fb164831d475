pub mod case_store;

pub use case_store::{AiUpdatePayload, CaseStore};
