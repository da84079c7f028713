//! Purpose: Describe the four upstream booking operations and their inbound requests.
//! Exports: `Operation`, `BookingRequest`, `PAYLOAD_PARAMETER`.
//! Role: Static table of SOAP names, result fields and routes plus request validation.
//! Invariants: The result field passed to the normalizer always comes from `Operation::result_field`.
//! Invariants: Validation failures happen before any upstream call is attempted.

use serde::Serialize;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

/// Name of the single string parameter every upstream operation accepts.
pub const PAYLOAD_PARAMETER: &str = "СтрокаJSON";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Authorize,
    Cancel,
    NextSlot,
    Enqueue,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Authorize,
        Operation::Cancel,
        Operation::NextSlot,
        Operation::Enqueue,
    ];

    /// Upstream SOAP operation name.
    pub fn soap_name(self) -> &'static str {
        match self {
            Operation::Authorize => "Authorization",
            Operation::Cancel => "CancelLastReg",
            Operation::NextSlot => "NextRegTime",
            Operation::Enqueue => "GetInLine",
        }
    }

    /// Key on the raw result that may hold the first-stage JSON text.
    pub fn result_field(self) -> &'static str {
        match self {
            Operation::Authorize => "AuthorizationResult",
            Operation::Cancel => "CancelLastRegResult",
            Operation::NextSlot => "NextRegTimeResult",
            Operation::Enqueue => "GetInLineResult",
        }
    }

    pub fn route(self) -> &'static str {
        match self {
            Operation::Authorize => "/api/auth",
            Operation::Cancel => "/api/cancel",
            Operation::NextSlot => "/api/next-slot",
            Operation::Enqueue => "/api/queue",
        }
    }

    /// Short name used in logs and on the command line.
    pub fn label(self) -> &'static str {
        match self {
            Operation::Authorize => "auth",
            Operation::Cancel => "cancel",
            Operation::NextSlot => "next-slot",
            Operation::Enqueue => "queue",
        }
    }

    fn garage_field(self) -> &'static str {
        match self {
            Operation::Authorize | Operation::NextSlot => "garageNumber",
            Operation::Cancel | Operation::Enqueue => "garNum",
        }
    }

    fn requires_reg_time(self) -> bool {
        matches!(self, Operation::Enqueue)
    }

    fn missing_fields_message(self) -> &'static str {
        if self.requires_reg_time() {
            "Missing garageNumber, phone, or regTime"
        } else {
            "Missing garageNumber or phone"
        }
    }
}

/// Validated inbound request for any of the four operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BookingRequest {
    pub garage_number: String,
    pub phone: String,
    pub reg_time: Option<String>,
}

#[derive(Serialize)]
struct UpstreamPayload<'a> {
    #[serde(rename = "GarNomer")]
    garage_number: &'a str,
    #[serde(rename = "Telephone")]
    phone: &'a str,
    #[serde(rename = "RegTime", skip_serializing_if = "Option::is_none")]
    reg_time: Option<&'a str>,
}

impl BookingRequest {
    pub fn new(garage_number: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            garage_number: garage_number.into(),
            phone: phone.into(),
            reg_time: None,
        }
    }

    pub fn with_reg_time(mut self, reg_time: impl Into<String>) -> Self {
        self.reg_time = Some(reg_time.into());
        self
    }

    /// Extracts the fields `operation` needs from an inbound JSON body.
    pub fn from_body(operation: Operation, body: &Value) -> Result<Self, Error> {
        let missing =
            || Error::new(ErrorKind::Validation).with_message(operation.missing_fields_message());

        let garage_number = field_text(body, operation.garage_field()).ok_or_else(missing)?;
        let phone = field_text(body, "phone").ok_or_else(missing)?;
        let reg_time = if operation.requires_reg_time() {
            Some(field_text(body, "regTime").ok_or_else(missing)?)
        } else {
            None
        };

        Ok(Self {
            garage_number,
            phone,
            reg_time,
        })
    }

    /// Checks that the request carries everything `operation` needs.
    pub fn validate_for(&self, operation: Operation) -> Result<(), Error> {
        let complete = !self.garage_number.is_empty()
            && !self.phone.is_empty()
            && (!operation.requires_reg_time()
                || self.reg_time.as_deref().is_some_and(|time| !time.is_empty()));
        if complete {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Validation).with_message(operation.missing_fields_message()))
        }
    }

    /// Encodes the JSON text passed as the upstream's single string parameter.
    pub fn upstream_payload(&self, operation: Operation) -> Result<String, Error> {
        let payload = UpstreamPayload {
            garage_number: &self.garage_number,
            phone: &self.phone,
            reg_time: if operation.requires_reg_time() {
                self.reg_time.as_deref()
            } else {
                None
            },
        };
        serde_json::to_string(&payload).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode upstream payload")
                .with_source(err)
        })
    }
}

fn field_text(body: &Value, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{BookingRequest, Operation};
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn routes_and_result_fields_follow_soap_names() {
        for operation in Operation::ALL {
            assert_eq!(
                operation.result_field(),
                format!("{}Result", operation.soap_name())
            );
            assert_eq!(operation.route(), format!("/api/{}", operation.label()));
        }
    }

    #[test]
    fn auth_reads_garage_number_field() {
        let body = json!({"garageNumber": "117", "phone": "+79990001122"});
        let request = BookingRequest::from_body(Operation::Authorize, &body).expect("request");
        assert_eq!(request, BookingRequest::new("117", "+79990001122"));
    }

    #[test]
    fn cancel_reads_gar_num_field() {
        let body = json!({"garageNumber": "117", "phone": "+79990001122"});
        let err = BookingRequest::from_body(Operation::Cancel, &body).expect_err("missing garNum");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), Some("Missing garageNumber or phone"));

        let body = json!({"garNum": 117, "phone": "+79990001122"});
        let request = BookingRequest::from_body(Operation::Cancel, &body).expect("request");
        assert_eq!(request.garage_number, "117");
    }

    #[test]
    fn queue_requires_reg_time() {
        let body = json!({"garNum": "117", "phone": "+79990001122"});
        let err = BookingRequest::from_body(Operation::Enqueue, &body).expect_err("missing regTime");
        assert_eq!(err.message(), Some("Missing garageNumber, phone, or regTime"));

        let body = json!({"phone": "+79990001122", "regTime": "2026-10-18T10:00:00"});
        let err = BookingRequest::from_body(Operation::Enqueue, &body).expect_err("missing garNum");
        assert_eq!(err.message(), Some("Missing garageNumber, phone, or regTime"));
    }

    #[test]
    fn empty_strings_and_non_objects_count_as_missing() {
        let body = json!({"garageNumber": "", "phone": "+79990001122"});
        assert!(BookingRequest::from_body(Operation::NextSlot, &body).is_err());
        assert!(BookingRequest::from_body(Operation::NextSlot, &json!([1, 2])).is_err());
        assert!(BookingRequest::from_body(Operation::NextSlot, &json!(null)).is_err());
    }

    #[test]
    fn payload_uses_upstream_field_names() {
        let request = BookingRequest::new("117", "+79990001122").with_reg_time("10:00");
        let payload = request.upstream_payload(Operation::Enqueue).expect("payload");
        assert_eq!(
            payload,
            r#"{"GarNomer":"117","Telephone":"+79990001122","RegTime":"10:00"}"#
        );

        let payload = request.upstream_payload(Operation::Authorize).expect("payload");
        assert_eq!(payload, r#"{"GarNomer":"117","Telephone":"+79990001122"}"#);
    }

    #[test]
    fn validate_for_checks_reg_time_only_for_queue() {
        let request = BookingRequest::new("117", "+79990001122");
        request.validate_for(Operation::Cancel).expect("cancel ok");
        let err = request.validate_for(Operation::Enqueue).expect_err("queue needs time");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
