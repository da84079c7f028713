//! Purpose: Library crate backing the `slotproxy` binary and its tests.
//! Exports: `core` (errors), `normalize`, `operation`, `upstream`, `soap`, `config`, `booking`, `serve`.
//! Role: Booking proxy that forwards four JSON routes to an upstream SOAP service.
//! Invariants: The normalizer stays pure; network I/O lives in `soap`, `upstream` and `serve`.
//! Invariants: Modules prefer explicit inputs/outputs over hidden state; the only shared state is `UpstreamHandle`.
pub mod booking;
pub mod config;
pub mod core;
pub(crate) mod json;
pub mod normalize;
pub mod operation;
pub mod serve;
pub mod soap;
pub mod upstream;

pub use crate::core::error::{DecodeStage, Error, ErrorKind, to_exit_code};
pub use config::UpstreamSettings;
pub use normalize::{NormalizedResult, normalize};
pub use operation::{BookingRequest, Operation};
pub use upstream::{Connector, Upstream, UpstreamHandle};
