//! Conversation metadata: the answers collected so far

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of assistance the user is purchasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    ConciergeRequest,
    FastTravelBooking,
    TravelConcierge,
}

impl Product {
    pub const ALL: [Product; 3] = [
        Product::ConciergeRequest,
        Product::FastTravelBooking,
        Product::TravelConcierge,
    ];

    /// Stable identifier accepted as a structured selection
    pub fn id(self) -> &'static str {
        match self {
            Product::ConciergeRequest => "concierge",
            Product::FastTravelBooking => "fast_travel",
            Product::TravelConcierge => "travel_concierge",
        }
    }

    /// Human readable name, also used as the assistant's title
    pub fn description(self) -> &'static str {
        match self {
            Product::ConciergeRequest => "Concierge Shopping",
            Product::FastTravelBooking => "Fast Travel Booking",
            Product::TravelConcierge => "Travel Concierge",
        }
    }

    /// Physical goods need a delivery address; travel services don't
    pub fn requires_shipping(self) -> bool {
        matches!(self, Product::ConciergeRequest)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A country the service delivers to (or the user's nationality)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code
    pub code: String,
    pub name: String,
}

impl Country {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// Built-in catalogue used when the embedding application supplies none
    pub fn catalogue() -> Vec<Country> {
        [
            ("AT", "Austria"),
            ("BE", "Belgium"),
            ("CA", "Canada"),
            ("CH", "Switzerland"),
            ("CZ", "Czech Republic"),
            ("DE", "Germany"),
            ("DK", "Denmark"),
            ("ES", "Spain"),
            ("FI", "Finland"),
            ("FR", "France"),
            ("GB", "United Kingdom"),
            ("HU", "Hungary"),
            ("IE", "Ireland"),
            ("IT", "Italy"),
            ("JP", "Japan"),
            ("NL", "Netherlands"),
            ("NO", "Norway"),
            ("PL", "Poland"),
            ("PT", "Portugal"),
            ("SE", "Sweden"),
            ("US", "United States"),
        ]
        .into_iter()
        .map(|(code, name)| Country::new(code, name))
        .collect()
    }
}

/// Delivery address for physical goods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
}

impl fmt::Display for ShippingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.name, self.street, self.city, self.postal_code
        )
    }
}

/// All domain answers collected so far, one optional field per step.
///
/// Values are replaced wholesale through `Conversation::update_metadata`;
/// nothing mutates a record in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Country>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_accepted: Option<bool>,
}
