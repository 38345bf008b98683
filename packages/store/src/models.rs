//! # Domain models for the relief committee
//!
//! These are the records cached by [`crate::LocalStore`] and exchanged with the
//! remote API. Field names follow the server's JSON (`husband_name`,
//! `num_family_members`, ...) so a record read back from the store can be sent
//! as-is.
//!
//! | Type | Represents |
//! |------|-----------|
//! | [`Resident`] | A household registered as an aid beneficiary. |
//! | [`AidRecord`] | One disbursement of aid to a resident. |
//! | [`Child`] | A child's benefit entitlement. |
//! | [`Import`] / [`Export`] | Incoming and outgoing financial entries. |
//! | [`Admin`] | Cached admin account, for offline display. |
//!
//! Every syncable record implements [`Entity`], which ties it to an
//! [`EntityType`] (and through it to a store namespace and an API path) and
//! exposes its [`RecordId`].

use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Prefix carried by every locally generated identifier.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Identifier of a record: server-assigned, or a temporary local one that has
/// not been confirmed yet.
///
/// Server ids are integers on the wire; temporary ids are strings starting
/// with [`TEMP_ID_PREFIX`], so the two can never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Server(i64),
    Temp(String),
}

impl RecordId {
    /// Generate a fresh temporary id.
    pub fn new_temp() -> Self {
        RecordId::Temp(format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, RecordId::Temp(_))
    }

    /// Key under which the record is stored locally.
    pub fn storage_key(&self) -> String {
        match self {
            RecordId::Server(id) => id.to_string(),
            RecordId::Temp(id) => id.clone(),
        }
    }

    /// Read the `id` field of a JSON record.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.get("id")?.clone()).ok()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// The kinds of record that go through the offline queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Resident,
    Aid,
    Child,
    Import,
    Export,
}

impl EntityType {
    /// Replay order: a record must be flushed after the records it references.
    pub const SYNC_ORDER: [EntityType; 5] = [
        EntityType::Resident,
        EntityType::Child,
        EntityType::Aid,
        EntityType::Import,
        EntityType::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Resident => "resident",
            EntityType::Aid => "aid",
            EntityType::Child => "child",
            EntityType::Import => "import",
            EntityType::Export => "export",
        }
    }

    /// Local store namespace holding cached records of this type.
    pub fn namespace(self) -> Namespace {
        match self {
            EntityType::Resident => Namespace::Residents,
            EntityType::Aid => Namespace::Aids,
            EntityType::Child => Namespace::Children,
            EntityType::Import => Namespace::Imports,
            EntityType::Export => Namespace::Exports,
        }
    }

    /// REST collection path on the remote API.
    pub fn path(self) -> &'static str {
        match self {
            EntityType::Resident => "/api/residents",
            EntityType::Aid => "/api/aids",
            EntityType::Child => "/api/children",
            EntityType::Import => "/api/imports",
            EntityType::Export => "/api/exports",
        }
    }

    /// Fields of this type's payload that hold the id of another record.
    pub fn references(self) -> &'static [(&'static str, EntityType)] {
        match self {
            EntityType::Aid => &[("resident_id", EntityType::Resident)],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical partitions of the local database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Residents,
    Aids,
    Children,
    Imports,
    Exports,
    /// The pending-operation queue.
    Pending,
    /// Resident ids deleted offline by older builds, migrated into the queue.
    PendingDeletes,
    /// Server ids of records that were created offline, by entity and
    /// temporary id.
    Aliases,
    Admins,
    Statistics,
}

impl Namespace {
    pub const ALL: [Namespace; 10] = [
        Namespace::Residents,
        Namespace::Aids,
        Namespace::Children,
        Namespace::Imports,
        Namespace::Exports,
        Namespace::Pending,
        Namespace::PendingDeletes,
        Namespace::Aliases,
        Namespace::Admins,
        Namespace::Statistics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Residents => "residents",
            Namespace::Aids => "aids",
            Namespace::Children => "children",
            Namespace::Imports => "imports",
            Namespace::Exports => "exports",
            Namespace::Pending => "pending",
            Namespace::PendingDeletes => "pending_deletes",
            Namespace::Aliases => "aliases",
            Namespace::Admins => "admins",
            Namespace::Statistics => "statistics",
        }
    }
}

/// A record that can be cached locally and replayed against the remote API.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    const TYPE: EntityType;

    fn id(&self) -> Option<&RecordId>;

    fn set_id(&mut self, id: RecordId);

    /// Reject the record before it is written anywhere.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Account role, as returned by the login endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Delegate,
    #[serde(other)]
    Staff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageLevel {
    Severe,
    Medium,
    Slight,
    None,
}

/// A household registered as an aid beneficiary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resident {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Head of household.
    #[serde(rename = "husband_name")]
    pub head_name: String,
    /// Nine-digit national identity number of the head of household.
    #[serde(rename = "husband_id_number")]
    pub national_id: String,
    #[serde(rename = "num_family_members")]
    pub family_size: u32,
    pub damage_level: DamageLevel,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(rename = "has_received_aid", default)]
    pub aid_received: bool,
    #[serde(default)]
    pub notes: String,
}

impl Resident {
    pub fn new(head_name: &str, national_id: &str) -> Self {
        Self {
            id: None,
            head_name: head_name.to_string(),
            national_id: national_id.to_string(),
            family_size: 1,
            damage_level: DamageLevel::None,
            neighborhood: String::new(),
            aid_received: false,
            notes: String::new(),
        }
    }
}

/// National ids are exactly nine ASCII digits.
pub fn is_valid_national_id(id: &str) -> bool {
    id.len() == 9 && id.bytes().all(|b| b.is_ascii_digit())
}

impl Entity for Resident {
    const TYPE: EntityType = EntityType::Resident;

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.head_name.trim().is_empty() {
            return Err(ValidationError::Missing("husband_name"));
        }
        if !is_valid_national_id(&self.national_id) {
            return Err(ValidationError::Invalid {
                field: "husband_id_number",
                reason: "must be exactly 9 digits".to_string(),
            });
        }
        if self.family_size == 0 {
            return Err(ValidationError::Invalid {
                field: "num_family_members",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// Wire labels used by the committee's server for the proposed aid types.
const HEALTH_PARCEL: &str = "طرد صحي";
const FOOD_PARCEL: &str = "طرد غذائي";
const VEGETABLE_PARCEL: &str = "طرد خضروات";
const CASH: &str = "مساعدات نقدية";
const AMOUNT_SEPARATOR: &str = " - ";

/// Kind of aid given. Serialised as the server's single `aid_type` string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AidType {
    HealthParcel,
    FoodParcel,
    VegetableParcel,
    Cash { amount: Option<String> },
    Other(String),
}

impl AidType {
    /// Whether this type belongs to the proposed set limited to one per resident.
    pub fn is_proposed(&self) -> bool {
        !matches!(self, AidType::Other(_))
    }

    pub fn to_wire(&self) -> String {
        match self {
            AidType::HealthParcel => HEALTH_PARCEL.to_string(),
            AidType::FoodParcel => FOOD_PARCEL.to_string(),
            AidType::VegetableParcel => VEGETABLE_PARCEL.to_string(),
            AidType::Cash { amount: Some(amount) } if !amount.trim().is_empty() => {
                format!("{CASH}{AMOUNT_SEPARATOR}{}", amount.trim())
            }
            AidType::Cash { .. } => CASH.to_string(),
            AidType::Other(text) => text.clone(),
        }
    }

    pub fn from_wire(s: &str) -> Self {
        let (base, suffix) = match s.split_once(AMOUNT_SEPARATOR) {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (s, None),
        };
        match base {
            HEALTH_PARCEL => AidType::HealthParcel,
            FOOD_PARCEL => AidType::FoodParcel,
            VEGETABLE_PARCEL => AidType::VegetableParcel,
            CASH => AidType::Cash {
                amount: suffix.map(str::to_string),
            },
            _ => AidType::Other(s.to_string()),
        }
    }
}

impl Serialize for AidType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for AidType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AidType::from_wire(&s))
    }
}

/// A logged instance of assistance given to a resident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AidRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub resident_id: RecordId,
    pub aid_type: AidType,
    pub date: NaiveDate,
    /// Role of the account that registered the aid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl AidRecord {
    pub fn new(resident_id: RecordId, aid_type: AidType, date: NaiveDate) -> Self {
        Self {
            id: None,
            resident_id,
            aid_type,
            date,
            role: None,
        }
    }
}

impl Entity for AidRecord {
    const TYPE: EntityType = EntityType::Aid;

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let AidType::Other(text) = &self.aid_type {
            if text.trim().is_empty() {
                return Err(ValidationError::Missing("aid_type"));
            }
        }
        Ok(())
    }
}

/// Enforce "at most one proposed aid per resident unless registered by an admin".
///
/// `existing` are the aids already recorded for the same resident.
pub fn check_proposed_aid(
    aid: &AidRecord,
    role: Option<Role>,
    existing: &[AidRecord],
) -> Result<(), ValidationError> {
    if role == Some(Role::Admin) || !aid.aid_type.is_proposed() {
        return Ok(());
    }
    let already = existing
        .iter()
        .filter(|a| a.resident_id == aid.resident_id && a.id != aid.id)
        .any(|a| a.aid_type.is_proposed());
    if already {
        return Err(ValidationError::ProposedAidExists);
    }
    Ok(())
}

/// A child's benefit entitlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Child {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    pub id_number: String,
    pub birth_date: NaiveDate,
    #[serde(default)]
    pub age: u32,
    pub phone: String,
    pub gender: String,
    pub benefit_type: String,
    #[serde(default)]
    pub benefit_count: u32,
}

impl Entity for Child {
    const TYPE: EntityType = EntityType::Child;

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("name", &self.name),
            ("id_number", &self.id_number),
            ("phone", &self.phone),
            ("gender", &self.gender),
            ("benefit_type", &self.benefit_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::Missing(field));
            }
        }
        Ok(())
    }
}

/// Incoming funds or goods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Import {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub name: String,
    pub date: NaiveDate,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub amount: f64,
}

impl Entity for Import {
    const TYPE: EntityType = EntityType::Import;

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_amount(self.amount)
    }
}

/// Outgoing expense.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
}

impl Entity for Export {
    const TYPE: EntityType = EntityType::Export;

    fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::Missing("description"));
        }
        validate_amount(self.amount)
    }
}

fn validate_amount(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ValidationError::Invalid {
            field: "amount",
            reason: "must be a non-negative number".to_string(),
        });
    }
    Ok(())
}

/// Totals shown on the committee's financial report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub total_imports: f64,
    pub total_exports: f64,
    pub balance: f64,
}

impl FinancialSummary {
    pub fn compute(imports: &[Import], exports: &[Export]) -> Self {
        let total_imports: f64 = imports.iter().map(|i| i.amount).sum();
        let total_exports: f64 = exports.iter().map(|e| e.amount).sum();
        Self {
            total_imports,
            total_exports,
            balance: total_imports - total_exports,
        }
    }
}

/// Cached admin account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_wire_format() {
        let server: RecordId = serde_json::from_str("42").unwrap();
        assert_eq!(server, RecordId::Server(42));

        let temp = RecordId::new_temp();
        assert!(temp.is_temp());
        assert!(temp.storage_key().starts_with(TEMP_ID_PREFIX));

        let value = serde_json::json!({ "id": 7, "husband_name": "x" });
        assert_eq!(RecordId::from_value(&value), Some(RecordId::Server(7)));
    }

    #[test]
    fn test_resident_uses_server_field_names() {
        let mut resident = Resident::new("Ahmad", "123456789");
        resident.family_size = 5;
        resident.damage_level = DamageLevel::Severe;
        let value = serde_json::to_value(&resident).unwrap();

        assert_eq!(value["husband_name"], "Ahmad");
        assert_eq!(value["husband_id_number"], "123456789");
        assert_eq!(value["num_family_members"], 5);
        assert_eq!(value["damage_level"], "severe");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_resident_validation() {
        assert!(Resident::new("Ahmad", "123456789").validate().is_ok());
        assert_eq!(
            Resident::new("  ", "123456789").validate(),
            Err(ValidationError::Missing("husband_name"))
        );
        assert!(Resident::new("Ahmad", "12345").validate().is_err());
        assert!(Resident::new("Ahmad", "12345678a").validate().is_err());
    }

    #[test]
    fn test_aid_type_wire_labels() {
        let cash = AidType::Cash {
            amount: Some("100".to_string()),
        };
        assert_eq!(cash.to_wire(), "مساعدات نقدية - 100");
        assert_eq!(AidType::from_wire("مساعدات نقدية - 100"), cash);
        assert_eq!(AidType::from_wire("طرد غذائي"), AidType::FoodParcel);

        let other = AidType::from_wire("blankets");
        assert_eq!(other, AidType::Other("blankets".to_string()));
        assert!(!other.is_proposed());
    }

    #[test]
    fn test_proposed_aid_limited_to_one_unless_admin() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let resident = RecordId::Server(1);
        let mut existing = AidRecord::new(resident.clone(), AidType::HealthParcel, date);
        existing.id = Some(RecordId::Server(10));

        let food = AidRecord::new(resident.clone(), AidType::FoodParcel, date);
        assert_eq!(
            check_proposed_aid(&food, Some(Role::Staff), &[existing.clone()]),
            Err(ValidationError::ProposedAidExists)
        );
        assert!(check_proposed_aid(&food, Some(Role::Admin), &[existing.clone()]).is_ok());

        let other = AidRecord::new(resident, AidType::Other("blankets".into()), date);
        assert!(check_proposed_aid(&other, Some(Role::Staff), &[existing]).is_ok());
    }

    #[test]
    fn test_financial_summary() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let imports = vec![
            Import {
                id: None,
                source: "donor".into(),
                name: "a".into(),
                date,
                kind: String::new(),
                amount: 500.0,
            },
            Import {
                id: None,
                source: "donor".into(),
                name: "b".into(),
                date,
                kind: String::new(),
                amount: 250.0,
            },
        ];
        let exports = vec![Export {
            id: None,
            description: "parcels".into(),
            amount: 300.0,
            date,
        }];
        let summary = FinancialSummary::compute(&imports, &exports);
        assert_eq!(summary.total_imports, 750.0);
        assert_eq!(summary.total_exports, 300.0);
        assert_eq!(summary.balance, 450.0);
    }
}
