//! Database access for the verification service
//!
//! Schema and connection setup live in `verity_common::db`.

pub mod notifications;
pub mod users;
