//! Foundation module - Core utilities and types
//!
//! - Math types and projection helpers
//! - Generation-checked handle tables
//! - Logging utilities

pub mod collections;
pub mod logging;
pub mod math;
