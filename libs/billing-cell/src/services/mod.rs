pub mod invoice;
pub mod payment;

pub use invoice::InvoiceService;
pub use payment::{apply_payment, PaymentApplication};
