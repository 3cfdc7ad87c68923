//! Helpers shared by unit and integration tests

pub mod async_helpers;

pub use async_helpers::*;
