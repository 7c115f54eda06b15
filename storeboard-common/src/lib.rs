//! # Storeboard Common Library
//!
//! Shared code for the storeboard client including:
//! - Domain record types (orders, products, media, devices, settings)
//! - Change feed and board event types
//! - Error types
//! - Configuration resolution

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
