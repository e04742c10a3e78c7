//! # Verity Common Library
//!
//! Shared code for the Verity profile verification services:
//! - Database schema, models and initialization
//! - Event types (VerityEvent) and the EventBus
//! - Session token signing and validation
//! - Configuration loading and root folder layout

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
