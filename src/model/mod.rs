//! Data model for the creative experimentation engine
//!
//! Records here are what the store persists and what the API returns.

pub mod creative;
pub mod experiment;
pub mod fatigue;
pub mod intent;
pub mod performance;
pub mod rotation;
pub mod selection;
