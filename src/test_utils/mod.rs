//! Test-only helpers shared across crate unit tests.
//!
//! This module is only compiled for unit tests and provides backend doubles
//! used by the connection and writer test modules.

pub mod scripted;

pub use scripted::{Delivery, ScriptedProvider};
