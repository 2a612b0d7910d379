//! Buy assistant
//!
//! Guides a customer through an assisted purchase one question at a time:
//! product, country, request details, shipping address when goods are
//! shipped, and privacy consent.

pub mod config;
pub mod conversation;
pub mod db;
pub mod runtime;
pub mod workflow;
