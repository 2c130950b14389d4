pub mod owner;
pub mod patient;
pub mod scope;

pub use owner::OwnerService;
pub use patient::PatientService;
pub use scope::{RecordScope, ScopeService};
