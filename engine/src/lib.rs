//! CRRT circuit clot-risk prediction engine.
//!
//! Raw clinical measurements are derived, aligned against the fitted
//! scaler and one of two gradient-boosted models, scored, and explained
//! with exact TreeSHAP attributions.

pub mod alignment;
pub mod booster;
pub mod bundle;
pub mod config;
pub mod error;
pub mod explainer;
pub mod features;
pub mod risk;
pub mod routes;
pub mod scaler;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;
