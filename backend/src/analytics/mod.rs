//! Per-customer behavioural analytics.
//!
//! - [`risk`] - spending-baseline risk classifier

pub mod risk;

pub use risk::{classify, customer_means, risk_level};
