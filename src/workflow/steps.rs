//! Steps of the assisted purchase dialogue

use super::error::ValidationError;
use super::step::WorkflowStep;
use crate::conversation::{
    Conversation, ConversationMetadata, Country, Product, ShippingAddress,
};

const MIN_REQUEST_CHARS: usize = 10;
const MAX_REQUEST_CHARS: usize = 3000;

pub const DEFAULT_PRIVACY_POLICY_URL: &str = "https://shopinbit.com/privacy-policy";

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn assistant_name(conversation: &Conversation) -> String {
    conversation
        .metadata
        .product
        .map_or_else(|| "Assistant".to_string(), |p| p.description().to_string())
}

// ============================================================================
// Product
// ============================================================================

/// Choose the kind of assistance
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductStep;

impl WorkflowStep for ProductStep {
    type Value = Product;

    fn key(&self) -> &'static str {
        "product"
    }

    fn bot_messages(&self, conversation: &Conversation) -> Vec<String> {
        let options = Product::ALL
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.description()))
            .collect::<Vec<_>>()
            .join("\n");

        let question = match &conversation.metadata.country {
            Some(country) => format!("Which service would you like to use in {}?", country.name),
            None => "Which service would you like to use?".to_string(),
        };

        vec![format!("{question}\n{options}")]
    }

    fn choices(&self, _conversation: &Conversation) -> Vec<String> {
        Product::ALL.iter().map(|p| p.id().to_string()).collect()
    }

    fn parse(&self, _conversation: &Conversation, raw: &str) -> Result<Product, ValidationError> {
        let input = normalize(raw);
        if input.is_empty() {
            return Err(ValidationError::new(self.key(), "Please choose a service"));
        }

        if let Ok(index) = input.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|i| Product::ALL.get(i).copied())
                .ok_or_else(|| {
                    ValidationError::new(
                        self.key(),
                        format!("Please pick a number between 1 and {}", Product::ALL.len()),
                    )
                });
        }

        Product::ALL
            .into_iter()
            .find(|p| p.id() == input || p.description().to_lowercase() == input)
            .ok_or_else(|| {
                ValidationError::new(self.key(), format!("Unknown service: {}", raw.trim()))
            })
    }

    fn retrieve_value(&self, conversation: &Conversation) -> Option<Product> {
        conversation.metadata.product
    }

    fn put_value(&self, conversation: &Conversation, value: Product) -> Conversation {
        conversation.update_metadata(|m| ConversationMetadata {
            product: Some(value),
            ..m
        })
    }

    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata {
        ConversationMetadata {
            product: None,
            ..metadata
        }
    }

    fn string_value(&self, value: &Product) -> String {
        value.description().to_string()
    }
}

// ============================================================================
// Country
// ============================================================================

/// Shipping destination, or nationality for non-shipping orders
#[derive(Debug, Clone)]
pub struct CountryStep {
    countries: Vec<Country>,
}

impl CountryStep {
    pub fn new(countries: Vec<Country>) -> Self {
        Self { countries }
    }
}

impl Default for CountryStep {
    fn default() -> Self {
        Self::new(Country::catalogue())
    }
}

impl WorkflowStep for CountryStep {
    type Value = Country;

    fn key(&self) -> &'static str {
        "country"
    }

    fn bot_messages(&self, conversation: &Conversation) -> Vec<String> {
        vec![
            format!(
                "Hello, I am your chosen {}. At present, we focus on requests where the value of the goods or services is at least $1,000 USD",
                assistant_name(conversation)
            ),
            "To start, please indicate your country. If your order involves shipping, provide the destination country. For non-shipping orders, please specify your nationality.".to_string(),
        ]
    }

    fn choices(&self, _conversation: &Conversation) -> Vec<String> {
        self.countries.iter().map(|c| c.name.clone()).collect()
    }

    fn parse(&self, _conversation: &Conversation, raw: &str) -> Result<Country, ValidationError> {
        let input = normalize(raw);
        if input.is_empty() {
            return Err(ValidationError::new(self.key(), "Please enter a country"));
        }

        self.countries
            .iter()
            .find(|c| c.code.to_lowercase() == input || c.name.to_lowercase() == input)
            .cloned()
            .ok_or_else(|| {
                ValidationError::new(self.key(), format!("Unknown country: {}", raw.trim()))
            })
    }

    fn retrieve_value(&self, conversation: &Conversation) -> Option<Country> {
        conversation.metadata.country.clone()
    }

    fn put_value(&self, conversation: &Conversation, value: Country) -> Conversation {
        conversation.update_metadata(|m| ConversationMetadata {
            country: Some(value),
            ..m
        })
    }

    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata {
        ConversationMetadata {
            country: None,
            ..metadata
        }
    }

    fn string_value(&self, value: &Country) -> String {
        value.name.clone()
    }
}

// ============================================================================
// Request
// ============================================================================

/// Free-text description of what the user wants
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestStep;

impl WorkflowStep for RequestStep {
    type Value = String;

    fn key(&self) -> &'static str {
        "request"
    }

    fn bot_messages(&self, conversation: &Conversation) -> Vec<String> {
        let text = match conversation.metadata.product {
            Some(Product::FastTravelBooking | Product::TravelConcierge) => {
                "Please describe your trip: where you want to go, when, and who is travelling."
            }
            _ => "Please describe what you would like us to get for you. Be as specific as you can about brand, model and quantity.",
        };
        vec![text.to_string()]
    }

    fn parse(&self, _conversation: &Conversation, raw: &str) -> Result<String, ValidationError> {
        let text = raw.trim();
        let chars = text.chars().count();
        if chars < MIN_REQUEST_CHARS {
            return Err(ValidationError::new(
                self.key(),
                format!("Please give us a bit more detail (at least {MIN_REQUEST_CHARS} characters)"),
            ));
        }
        if chars > MAX_REQUEST_CHARS {
            return Err(ValidationError::new(
                self.key(),
                format!("Please keep your request under {MAX_REQUEST_CHARS} characters"),
            ));
        }
        Ok(text.to_string())
    }

    fn retrieve_value(&self, conversation: &Conversation) -> Option<String> {
        conversation.metadata.request.clone()
    }

    fn put_value(&self, conversation: &Conversation, value: String) -> Conversation {
        conversation.update_metadata(|m| ConversationMetadata {
            request: Some(value),
            ..m
        })
    }

    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata {
        ConversationMetadata {
            request: None,
            ..metadata
        }
    }

    fn string_value(&self, value: &String) -> String {
        value.clone()
    }
}

// ============================================================================
// Shipping address
// ============================================================================

/// Delivery address; only asked when the product ships physical goods
#[derive(Debug, Clone, Copy, Default)]
pub struct ShippingAddressStep;

impl WorkflowStep for ShippingAddressStep {
    type Value = ShippingAddress;

    fn key(&self) -> &'static str {
        "shipping_address"
    }

    fn applies(&self, conversation: &Conversation) -> bool {
        conversation
            .metadata
            .product
            .is_some_and(Product::requires_shipping)
    }

    fn bot_messages(&self, conversation: &Conversation) -> Vec<String> {
        let destination = conversation
            .metadata
            .country
            .as_ref()
            .map_or_else(String::new, |c| format!(" in {}", c.name));
        vec![format!(
            "Where should we deliver your order{destination}? Please reply with: name, street, city, postal code"
        )]
    }

    fn parse(
        &self,
        _conversation: &Conversation,
        raw: &str,
    ) -> Result<ShippingAddress, ValidationError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [name, street, city, postal_code]
                if parts.iter().all(|part| !part.is_empty()) =>
            {
                Ok(ShippingAddress {
                    name: (*name).to_string(),
                    street: (*street).to_string(),
                    city: (*city).to_string(),
                    postal_code: (*postal_code).to_string(),
                })
            }
            _ => Err(ValidationError::new(
                self.key(),
                "Please use the format: name, street, city, postal code",
            )),
        }
    }

    fn retrieve_value(&self, conversation: &Conversation) -> Option<ShippingAddress> {
        conversation.metadata.shipping_address.clone()
    }

    fn put_value(&self, conversation: &Conversation, value: ShippingAddress) -> Conversation {
        conversation.update_metadata(|m| ConversationMetadata {
            shipping_address: Some(value),
            ..m
        })
    }

    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata {
        ConversationMetadata {
            shipping_address: None,
            ..metadata
        }
    }

    fn string_value(&self, value: &ShippingAddress) -> String {
        value.to_string()
    }
}

// ============================================================================
// Privacy policy
// ============================================================================

/// Explicit acceptance of the partner's privacy policy
#[derive(Debug, Clone)]
pub struct PrivacyPolicyStep {
    policy_url: String,
}

impl PrivacyPolicyStep {
    pub fn new(policy_url: impl Into<String>) -> Self {
        Self {
            policy_url: policy_url.into(),
        }
    }
}

impl Default for PrivacyPolicyStep {
    fn default() -> Self {
        Self::new(DEFAULT_PRIVACY_POLICY_URL)
    }
}

impl WorkflowStep for PrivacyPolicyStep {
    type Value = bool;

    fn key(&self) -> &'static str {
        "privacy_policy"
    }

    fn bot_messages(&self, _conversation: &Conversation) -> Vec<String> {
        vec![
            format!(
                "Your request will be shared with our partner ShopinBit. Please read their privacy policy: {}",
                self.policy_url
            ),
            "Do you accept the privacy policy? (yes/no)".to_string(),
        ]
    }

    fn choices(&self, _conversation: &Conversation) -> Vec<String> {
        vec!["yes".to_string(), "no".to_string()]
    }

    fn parse(&self, _conversation: &Conversation, raw: &str) -> Result<bool, ValidationError> {
        match normalize(raw).as_str() {
            "yes" | "y" | "accept" | "i accept" | "agree" | "i agree" => Ok(true),
            "no" | "n" | "decline" => Err(ValidationError::new(
                self.key(),
                "We can only continue once you accept the privacy policy",
            )),
            _ => Err(ValidationError::new(self.key(), "Please answer yes or no")),
        }
    }

    fn retrieve_value(&self, conversation: &Conversation) -> Option<bool> {
        conversation.metadata.privacy_accepted
    }

    fn put_value(&self, conversation: &Conversation, value: bool) -> Conversation {
        conversation.update_metadata(|m| ConversationMetadata {
            privacy_accepted: Some(value),
            ..m
        })
    }

    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata {
        ConversationMetadata {
            privacy_accepted: None,
            ..metadata
        }
    }

    fn string_value(&self, value: &bool) -> String {
        let text = if *value { "Accepted" } else { "Declined" };
        text.to_string()
    }
}
