//! Per-step payload mapping.
//!
//! Each form step posts its own DTO. A mapper registered under the step number
//! deserializes and validates that DTO and flattens it into the columns of the
//! shared applicant record, prefixed with the step's section name. Unknown step
//! numbers are a typed error, never a panic.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::KycError;

/// Flattened column → value map for the applicant record.
pub type StepRecord = Map<String, Value>;

/// A typed step payload.
pub trait StepPayload: DeserializeOwned + Serialize {
    /// Business-rule checks beyond what deserialization enforces.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

type Mapper = Box<dyn Fn(&Value) -> Result<StepRecord, KycError> + Send + Sync>;

pub struct StepMapperRegistry {
    mappers: BTreeMap<i32, Mapper>,
}

impl StepMapperRegistry {
    pub fn empty() -> Self {
        Self {
            mappers: BTreeMap::new(),
        }
    }

    /// The fourteen steps of the standard individual KYC form.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register::<PersonalInfo>(1, "personal");
        registry.register::<AddressDetails>(2, "current_address");
        registry.register::<AddressDetails>(3, "permanent_address");
        registry.register::<FamilyDetails>(4, "family");
        registry.register::<OccupationDetails>(5, "occupation");
        registry.register::<FinancialDetails>(6, "financial");
        registry.register::<BankAccountDetails>(7, "account");
        registry.register::<NomineeDetails>(8, "nominee");
        registry.register::<IdentityDocument>(9, "identity");
        registry.register::<PhotoSignature>(10, "media");
        registry.register::<BeneficialOwner>(11, "beneficial_owner");
        registry.register::<PepDeclaration>(12, "pep");
        registry.register::<ConsentDetails>(13, "consent");
        registry.register::<ReviewConfirmation>(14, "review");
        registry
    }

    pub fn register<P: StepPayload + 'static>(&mut self, step_number: i32, section: &'static str) {
        self.mappers.insert(
            step_number,
            Box::new(move |payload| map_typed::<P>(section, payload)),
        );
    }

    pub fn is_registered(&self, step_number: i32) -> bool {
        self.mappers.contains_key(&step_number)
    }

    pub fn map(&self, step_number: i32, payload: &Value) -> Result<StepRecord, KycError> {
        let mapper = self
            .mappers
            .get(&step_number)
            .ok_or(KycError::UnsupportedStep(step_number))?;
        mapper(payload)
    }
}

impl Default for StepMapperRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn map_typed<P: StepPayload>(section: &str, payload: &Value) -> Result<StepRecord, KycError> {
    let dto: P = serde_json::from_value(payload.clone())
        .map_err(|e| KycError::Validation(format!("{section}: {e}")))?;
    dto.validate()
        .map_err(|msg| KycError::Validation(format!("{section}: {msg}")))?;
    match serde_json::to_value(&dto).map_err(|e| KycError::Internal(e.into()))? {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (format!("{section}_{k}"), v))
            .collect()),
        _ => Err(KycError::Validation(format!(
            "{section}: payload must be an object"
        ))),
    }
}

fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} is required"))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct PersonalInfo {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub nationality: String,
}

impl StepPayload for PersonalInfo {
    fn validate(&self) -> Result<(), String> {
        require(&self.first_name, "firstName")?;
        require(&self.last_name, "lastName")?;
        require(&self.nationality, "nationality")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct AddressDetails {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub district: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

impl StepPayload for AddressDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.line1, "line1")?;
        require(&self.city, "city")?;
        require(&self.country, "country")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct FamilyDetails {
    pub father_name: String,
    pub mother_name: String,
    pub grandfather_name: Option<String>,
    pub spouse_name: Option<String>,
    pub marital_status: String,
}

impl StepPayload for FamilyDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.father_name, "fatherName")?;
        require(&self.mother_name, "motherName")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct OccupationDetails {
    pub occupation_type: String,
    pub organization_name: Option<String>,
    pub designation: Option<String>,
    pub annual_income_range: Option<String>,
}

impl StepPayload for OccupationDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.occupation_type, "occupationType")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct FinancialDetails {
    pub source_of_funds: String,
    pub expected_monthly_turnover: Option<String>,
    pub expected_monthly_transactions: Option<u32>,
}

impl StepPayload for FinancialDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.source_of_funds, "sourceOfFunds")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct BankAccountDetails {
    pub account_type: String,
    pub currency: String,
    pub branch: Option<String>,
    pub purpose: Option<String>,
}

impl StepPayload for BankAccountDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.account_type, "accountType")?;
        if self.currency.len() != 3 {
            return Err("currency must be a 3-letter code".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct NomineeDetails {
    pub nominee_name: String,
    pub relationship: String,
    pub nominee_date_of_birth: Option<NaiveDate>,
    pub contact_number: Option<String>,
}

impl StepPayload for NomineeDetails {
    fn validate(&self) -> Result<(), String> {
        require(&self.nominee_name, "nomineeName")?;
        require(&self.relationship, "relationship")
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct IdentityDocument {
    pub document_type: String,
    pub document_number: String,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub issuing_authority: Option<String>,
}

impl StepPayload for IdentityDocument {
    fn validate(&self) -> Result<(), String> {
        require(&self.document_type, "documentType")?;
        require(&self.document_number, "documentNumber")?;
        if let (Some(issued), Some(expires)) = (self.issue_date, self.expiry_date) {
            if expires <= issued {
                return Err("expiryDate must be after issueDate".into());
            }
        }
        Ok(())
    }
}

/// Document ids point into the external document store.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct PhotoSignature {
    pub photo_document_id: i64,
    pub signature_document_id: i64,
}

impl StepPayload for PhotoSignature {}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct BeneficialOwner {
    pub has_beneficial_owner: bool,
    pub owner_name: Option<String>,
    pub owner_relationship: Option<String>,
}

impl StepPayload for BeneficialOwner {
    fn validate(&self) -> Result<(), String> {
        if self.has_beneficial_owner {
            require(self.owner_name.as_deref().unwrap_or_default(), "ownerName")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct PepDeclaration {
    pub is_pep: bool,
    pub pep_position: Option<String>,
    pub is_related_to_pep: bool,
}

impl StepPayload for PepDeclaration {
    fn validate(&self) -> Result<(), String> {
        if self.is_pep {
            require(self.pep_position.as_deref().unwrap_or_default(), "pepPosition")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct ConsentDetails {
    pub agree_terms: bool,
    pub agree_privacy: bool,
    #[serde(default)]
    pub consent_data_sharing: bool,
}

impl StepPayload for ConsentDetails {
    fn validate(&self) -> Result<(), String> {
        if !(self.agree_terms && self.agree_privacy) {
            return Err("terms and privacy policy must be accepted".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase", serialize = "snake_case"))]
pub struct ReviewConfirmation {
    pub confirm_accuracy: bool,
}

impl StepPayload for ReviewConfirmation {
    fn validate(&self) -> Result<(), String> {
        if !self.confirm_accuracy {
            return Err("accuracy must be confirmed".into());
        }
        Ok(())
    }
}
