//! Hopwire Core Types
//!
//! This crate defines the data model shared by the credential store, the
//! circuit controller and the hop-chaining dialer, together with the error
//! taxonomy every other crate reports through.

mod error;
mod tunnel;
mod types;

pub use error::*;
pub use tunnel::*;
pub use types::*;
