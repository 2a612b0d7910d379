//! Step-sequenced conversation workflow
//!
//! Steps are answered strictly in schema order. The driver finds the first
//! unanswered applicable step, emits its prompt once, and folds validated
//! answers into new conversation snapshots.

mod driver;
mod effect;
pub mod error;
pub mod event;
mod step;
pub mod steps;
pub(crate) mod transition;


pub use driver::{Clock, WorkflowBuilder, WorkflowDriver};
pub use effect::Effect;
pub use error::{ErrorKind, ValidationError, WorkflowError};
pub use event::Event;
pub use step::{Accepted, Step, WorkflowStep};
pub use transition::{reject, transition, TransitionResult};

use crate::conversation::Country;
use steps::{CountryStep, PrivacyPolicyStep, ProductStep, RequestStep, ShippingAddressStep};

pub const COMPLETION_MESSAGE: &str =
    "Thank you! We have everything we need and will get back to you with an offer shortly.";

/// The assisted purchase schema: product, country, request, shipping
/// address (goods only), privacy policy.
pub fn purchase_workflow(countries: Vec<Country>) -> WorkflowDriver {
    WorkflowDriver::builder()
        .step(ProductStep)
        .step(CountryStep::new(countries))
        .step(RequestStep)
        .step(ShippingAddressStep)
        .step(PrivacyPolicyStep::default())
        .completion_message(COMPLETION_MESSAGE)
        .build()
}
