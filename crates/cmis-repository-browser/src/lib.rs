//! CMIS 1.1 Browser Binding implementation of the remote session traits.
//!
//! - [`BrowserConnectionFactory`]: opens sessions against a Browser Binding URL
//! - [`BrowserSession`]: `RemoteSession` over JSON/HTTP with basic auth

mod client;
mod wire;

pub use client::{status_error, BrowserBindingParams, BrowserConnectionFactory, BrowserSession};
