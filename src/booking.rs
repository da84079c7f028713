//! Purpose: Run one booking operation end to end.
//! Exports: `dispatch`, `dispatch_request`.
//! Role: validate -> encode payload -> upstream call -> normalize -> data or business error.
//! Invariants: Validation errors return before the upstream handle is touched.
//! Invariants: The normalizer always receives `Operation::result_field` for the invoked operation.

use serde_json::Value;
use tracing::{debug, info};

use crate::core::error::Error;
use crate::normalize::normalize;
use crate::operation::{BookingRequest, Operation};
use crate::upstream::UpstreamHandle;

/// Handles a raw inbound JSON body for `operation`.
pub async fn dispatch(
    upstream: &UpstreamHandle,
    operation: Operation,
    body: &Value,
) -> Result<Value, Error> {
    let request = BookingRequest::from_body(operation, body)?;
    dispatch_request(upstream, operation, &request).await
}

/// Handles an already extracted request for `operation`.
pub async fn dispatch_request(
    upstream: &UpstreamHandle,
    operation: Operation,
    request: &BookingRequest,
) -> Result<Value, Error> {
    request.validate_for(operation)?;
    debug!(
        operation = operation.label(),
        garage = %request.garage_number,
        "dispatching booking request"
    );

    let payload = request.upstream_payload(operation)?;
    let raw = upstream.call(operation, payload).await?;
    let data = normalize(raw, operation.result_field())?.into_data()?;

    info!(operation = operation.label(), garage = %request.garage_number, "booking request succeeded");
    Ok(data)
}
