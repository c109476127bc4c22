//! Testing utilities
//!
//! Mock connectors that let the bindings run without a server or broker.

pub mod mocks;

pub use mocks::*;
