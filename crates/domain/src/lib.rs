//! Shared types for the pinmark annotation server: configuration, the
//! session/annotation/tenant model, the event envelope, and the error type
//! every other crate propagates.

pub mod config;
pub mod error;
pub mod model;
pub mod trace;

pub use error::{Error, Result};
