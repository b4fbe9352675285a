//! Core business logic for cmsvs-rs.

pub mod services;

pub use services::*;
