//! Purpose: SOAP transport to the upstream booking service.
//! Exports: `SoapConfig`, `SoapClient`, `Credentials`, plus envelope/WSDL helpers.
//! Role: The concrete `Upstream`/`Connector` behind the cached handle.
//! Invariants: Only SOAP 1.1 document/literal with a single string parameter is supported.

mod client;
pub mod envelope;
pub mod wsdl;

pub use client::{Credentials, SoapClient, SoapConfig};
