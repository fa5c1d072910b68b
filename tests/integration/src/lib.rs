//! Integration test utilities for the presence engine
//!
//! This crate provides an in-memory backend and fixtures for running the
//! whole client stack (transport, engine, facade) end to end.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
