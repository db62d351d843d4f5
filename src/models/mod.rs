use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Site family a listing was harvested from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Athome,
    Immotop,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Athome => "athome",
            Source::Immotop => "immotop",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the listing is offered for sale or for rent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    #[serde(alias = "buy")]
    Sale,
    Rent,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Sale => "sale",
            TransactionType::Rent => "rent",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a phone number was found
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhoneSource {
    /// Pattern match inside the description text
    Description,
    /// Revealed by clicking the "show number" control
    Button,
}

/// One superseded title
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleChange {
    #[serde(alias = "title")]
    pub previous_title: String,
    pub changed_at: DateTime<Utc>,
}

/// Canonical listing record shared by every store backend.
///
/// Booleans are tri-state (`None` = unknown) and are stored as 0/1/null integers.
/// Timestamps are owned by the store: extraction leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListingRecord {
    pub listing_ref: String,
    #[serde(default)]
    pub agency_ref: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub listing_url: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,

    // Prices
    #[serde(default)]
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub rent_price: Option<f64>,
    #[serde(default)]
    pub monthly_charges: Option<f64>,
    #[serde(default)]
    pub deposit: Option<f64>,
    #[serde(default)]
    pub commission: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,

    // General
    #[serde(default)]
    pub surface_m2: Option<f64>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub rooms: Option<i32>,
    #[serde(default)]
    pub bedrooms: Option<i32>,
    #[serde(default)]
    pub year_of_construction: Option<i32>,

    // Indoor
    #[serde(default, with = "tri_state")]
    pub fitted_kitchen: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub open_kitchen: Option<bool>,
    #[serde(default)]
    pub shower_rooms: Option<i32>,
    #[serde(default)]
    pub bathrooms: Option<i32>,
    #[serde(default)]
    pub separate_toilets: Option<i32>,
    #[serde(default, with = "tri_state")]
    pub furnished: Option<bool>,

    // Outdoor
    #[serde(default, with = "tri_state")]
    pub balcony: Option<bool>,
    #[serde(default)]
    pub balcony_m2: Option<f64>,
    #[serde(default)]
    pub terrace_m2: Option<f64>,
    #[serde(default, with = "tri_state")]
    pub garden: Option<bool>,
    #[serde(default)]
    pub parking_spaces: Option<i32>,

    // Energy
    #[serde(default)]
    pub energy_class: Option<String>,
    #[serde(default)]
    pub thermal_insulation_class: Option<String>,
    #[serde(default, with = "tri_state")]
    pub gas_heating: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub electric_heating: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub heat_pump: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub district_heating: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub pellet_heating: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub oil_heating: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub solar_heating: Option<bool>,

    // Others
    #[serde(default, with = "tri_state")]
    pub basement: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub laundry_room: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub elevator: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub storage: Option<bool>,
    #[serde(default, with = "tri_state")]
    pub pets_allowed: Option<bool>,

    // Contact
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub phone_source: Option<PhoneSource>,
    #[serde(default)]
    pub agency_name: Option<String>,
    #[serde(default)]
    pub agency_url: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agency_logo_url: Option<String>,

    // Media
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub images_dir: Option<String>,

    // Versioning, owned by the store
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title_history: Vec<TitleChange>,
}

impl ListingRecord {
    pub fn new(listing_ref: impl Into<String>) -> Self {
        Self {
            listing_ref: listing_ref.into(),
            ..Default::default()
        }
    }

    /// Price shown in log lines: sale price, else rent price
    pub fn headline_price(&self) -> Option<f64> {
        self.sale_price.or(self.rent_price)
    }
}

/// Serialises `Option<bool>` as a 0/1/null integer so both backends hold the
/// same shape at rest.
pub mod tri_state {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(flag) => serializer.serialize_some(&i32::from(*flag)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let raw: Option<i64> = Option::deserialize(deserializer)?;
        Ok(raw.map(|n| n != 0))
    }
}
