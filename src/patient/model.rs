use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::identity::PatientId;

/// Text form of a date of birth, also what search matches against
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Postal address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Street and number
    pub street: String,
    /// City
    pub city: String,
    /// State or province
    pub state: String,
    /// Postal code
    pub zip_code: String,
    /// Country
    pub country: String,
}

/// One way of reaching a patient.
///
/// `value` is unique across every patient on every shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactEntry {
    /// Kind of contact, e.g. `phone` or `email`
    #[serde(rename = "type")]
    pub contact_type: String,
    /// Phone number, address, etc.
    pub value: String,
}

impl ContactEntry {
    /// Creates a contact entry
    pub fn new(contact_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            contact_type: contact_type.into(),
            value: value.into(),
        }
    }
}

/// Caller-supplied fields of a patient, used both to create and to update.
///
/// Validation happens before these reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Free text
    pub gender: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Required address
    pub primary_address: Address,
    /// Optional second address; absent on update removes it
    #[serde(default)]
    pub secondary_address: Option<Address>,
    /// Full contact set
    #[serde(default)]
    pub contacts: Vec<ContactEntry>,
}

impl PatientDetails {
    /// Every contact value, in the order given
    pub fn contact_values(&self) -> Vec<String> {
        self.contacts.iter().map(|c| c.value.clone()).collect()
    }
}

/// A stored patient record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// Identifier; also decides the owning shard
    pub id: PatientId,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Free text
    pub gender: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// False once deactivated
    pub is_active: bool,
    /// Reason given at the last deactivation
    pub inactive_reason: Option<String>,
    /// Required address
    pub primary_address: Address,
    /// Optional second address
    pub secondary_address: Option<Address>,
    /// Sorted by type then value; the set itself is unordered
    pub contacts: Vec<ContactEntry>,
}

impl Patient {
    /// A new, active record built from `details`
    pub fn from_details(id: PatientId, details: PatientDetails) -> Self {
        let mut patient = Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            gender: String::new(),
            date_of_birth: details.date_of_birth,
            is_active: true,
            inactive_reason: None,
            primary_address: details.primary_address.clone(),
            secondary_address: None,
            contacts: Vec::new(),
        };
        patient.apply(details);
        patient
    }

    /// Overwrites everything the caller controls.
    ///
    /// Contacts and the secondary address are replaced wholesale, so an absent
    /// secondary address removes the stored one. The identifier and the active
    /// flag and reason are left alone.
    pub fn apply(&mut self, details: PatientDetails) {
        let PatientDetails {
            first_name,
            last_name,
            gender,
            date_of_birth,
            primary_address,
            secondary_address,
            mut contacts,
        } = details;

        contacts.sort();
        self.first_name = first_name;
        self.last_name = last_name;
        self.gender = gender;
        self.date_of_birth = date_of_birth;
        self.primary_address = primary_address;
        self.secondary_address = secondary_address;
        self.contacts = contacts;
    }

    /// Date of birth as stored and searched
    pub fn date_of_birth_text(&self) -> String {
        self.date_of_birth.format(DATE_FORMAT).to_string()
    }
}
