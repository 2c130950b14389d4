use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Clinic roles. Every visibility scope and permission is derived from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[serde(alias = "vet")]
    Veterinarian,
    Staff,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Book for any active patient, not only the caller's own pets.
    ScheduleAnyPatient,
    /// Book for patients owned by the caller.
    ScheduleOwnPatient,
    /// Read every appointment, consultation and record in the clinic.
    ViewAllRecords,
    /// Edit, reschedule or cancel any appointment.
    ManageAppointments,
    ManageOwners,
    ManagePatients,
    RegisterOwnPatient,
    RecordConsultation,
    WritePrescription,
    DispensePrescription,
    CreateInvoice,
    RecordAnyPayment,
    PayOwnInvoice,
    ManageVaccineCatalog,
    AdministerVaccine,
    ManageTreatmentCatalog,
    /// Order diagnostic tests and enter their results.
    RecordDiagnostics,
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ScheduleAnyPatient,
    Capability::ViewAllRecords,
    Capability::ManageAppointments,
    Capability::ManageOwners,
    Capability::ManagePatients,
    Capability::DispensePrescription,
    Capability::CreateInvoice,
    Capability::RecordAnyPayment,
    Capability::ManageVaccineCatalog,
    Capability::ManageTreatmentCatalog,
];

const VETERINARIAN_CAPABILITIES: &[Capability] = &[
    Capability::ScheduleAnyPatient,
    Capability::ViewAllRecords,
    Capability::ManageAppointments,
    Capability::ManagePatients,
    Capability::RecordConsultation,
    Capability::WritePrescription,
    Capability::ManageVaccineCatalog,
    Capability::AdministerVaccine,
    Capability::ManageTreatmentCatalog,
    Capability::RecordDiagnostics,
];

const STAFF_CAPABILITIES: &[Capability] = &[
    Capability::ScheduleAnyPatient,
    Capability::ViewAllRecords,
    Capability::ManageAppointments,
    Capability::ManageOwners,
    Capability::ManagePatients,
    Capability::DispensePrescription,
    Capability::CreateInvoice,
    Capability::RecordAnyPayment,
    Capability::AdministerVaccine,
    Capability::RecordDiagnostics,
];

const CLIENT_CAPABILITIES: &[Capability] = &[
    Capability::ScheduleOwnPatient,
    Capability::RegisterOwnPatient,
    Capability::PayOwnInvoice,
];

impl Role {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Veterinarian => VETERINARIAN_CAPABILITIES,
            Role::Staff => STAFF_CAPABILITIES,
            Role::Client => CLIENT_CAPABILITIES,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Veterinarian => "veterinarian",
            Role::Staff => "staff",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "veterinarian" | "vet" => Ok(Role::Veterinarian),
            "staff" => Ok(Role::Staff),
            "client" => Ok(Role::Client),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vet_aliases_parse_to_veterinarian() {
        assert_eq!("Vet".parse::<Role>().unwrap(), Role::Veterinarian);
        assert_eq!("Veterinarian".parse::<Role>().unwrap(), Role::Veterinarian);
        assert_eq!(Role::Veterinarian.to_string(), "veterinarian");
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!("authenticated".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_client_capabilities_are_owner_scoped() {
        assert!(Role::Client.can(Capability::ScheduleOwnPatient));
        assert!(Role::Client.can(Capability::PayOwnInvoice));
        assert!(!Role::Client.can(Capability::ScheduleAnyPatient));
        assert!(!Role::Client.can(Capability::ViewAllRecords));
        assert!(!Role::Client.can(Capability::ManageAppointments));
    }

    #[test]
    fn test_only_veterinarians_record_consultations() {
        for role in [Role::Admin, Role::Staff, Role::Client] {
            assert!(!role.can(Capability::RecordConsultation), "{} should not record", role);
        }
        assert!(Role::Veterinarian.can(Capability::RecordConsultation));
        assert!(Role::Veterinarian.can(Capability::WritePrescription));
    }

    #[test]
    fn test_billing_capabilities() {
        assert!(Role::Staff.can(Capability::CreateInvoice));
        assert!(Role::Admin.can(Capability::RecordAnyPayment));
        assert!(!Role::Veterinarian.can(Capability::CreateInvoice));
    }

    #[test]
    fn test_clinical_detail_capabilities() {
        assert!(Role::Veterinarian.can(Capability::ManageTreatmentCatalog));
        assert!(!Role::Staff.can(Capability::ManageTreatmentCatalog));
        assert!(Role::Staff.can(Capability::RecordDiagnostics));
        assert!(!Role::Client.can(Capability::RecordDiagnostics));
    }

    #[test]
    fn test_serde_uses_snake_case_and_accepts_vet() {
        let role: Role = serde_json::from_str("\"vet\"").unwrap();
        assert_eq!(role, Role::Veterinarian);
        assert_eq!(serde_json::to_string(&Role::Staff).unwrap(), "\"staff\"");
    }
}
