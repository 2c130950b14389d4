pub mod catalog;
pub mod records;

pub use catalog::VaccineCatalogService;
pub use records::VaccinationRecordService;
