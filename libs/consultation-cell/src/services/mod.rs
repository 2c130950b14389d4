pub mod consultation;
pub mod diagnostic;
pub mod prescription;
pub mod treatment;

pub use consultation::ConsultationService;
pub use diagnostic::DiagnosticTestService;
pub use prescription::PrescriptionService;
pub use treatment::{ConsultationTreatmentService, TreatmentCatalogService};
