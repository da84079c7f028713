//! Purpose: Encode SOAP 1.1 request envelopes and decode response bodies into JSON values.
//! Exports: `encode_request`, `decode_response`, `SOAP_ENV_NS`.
//! Role: Pure XML <-> JSON mapping; transport lives in `client`.
//! Invariants: Request text content is always XML-escaped by the writer.
//! Invariants: Decoded keys are local names; prefixes and attributes are dropped.
//! Invariants: A `Fault` body is reported as `ErrorKind::Transport` with its faultstring.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Builds `<Envelope><Body><m:{operation}><m:{parameter}>{value}</..>` with
/// `m` bound to `namespace`.
pub fn encode_request(
    namespace: &str,
    operation: &str,
    parameter: &str,
    value: &str,
) -> Result<String, Error> {
    let mut writer = Writer::new(Vec::new());
    write_request(&mut writer, namespace, operation, parameter, value).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to encode SOAP envelope: {err}"))
    })?;
    String::from_utf8(writer.into_inner()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("SOAP envelope is not UTF-8")
            .with_source(err)
    })
}

fn write_request(
    writer: &mut Writer<Vec<u8>>,
    namespace: &str,
    operation: &str,
    parameter: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let operation_tag = format!("m:{operation}");
    let parameter_tag = format!("m:{parameter}");

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("soap:Envelope")
            .with_attributes([("xmlns:soap", SOAP_ENV_NS), ("xmlns:m", namespace)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("soap:Body")))?;
    writer.write_event(Event::Start(BytesStart::new(operation_tag.as_str())))?;
    writer.write_event(Event::Start(BytesStart::new(parameter_tag.as_str())))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(parameter_tag.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(operation_tag.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new("soap:Body")))?;
    writer.write_event(Event::End(BytesEnd::new("soap:Envelope")))?;
    Ok(())
}

/// Converts the first child of the envelope `Body` into a JSON value.
///
/// For a typical response `<m:AuthorizationResponse><m:return>..</m:return>`
/// this yields `{"return": ".."}`.
pub fn decode_response(xml: &str) -> Result<Value, Error> {
    let document = xml_to_value(xml)?;
    let body = document
        .root
        .get("Body")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("SOAP response has no Body element"))?;

    if let Some(fault) = body.get("Fault") {
        return Err(fault_error(fault));
    }

    let first = document
        .body_first_child
        .as_deref()
        .and_then(|name| body.get(name))
        .ok_or_else(|| malformed("SOAP response Body is empty"))?;
    // A repeated element name was folded into an array; keep the first occurrence.
    match first {
        Value::Array(items) => items
            .first()
            .cloned()
            .ok_or_else(|| malformed("SOAP response Body is empty")),
        other => Ok(other.clone()),
    }
}

/// Returns the fault description when `xml` is a SOAP fault envelope.
pub fn fault_message(xml: &str) -> Option<String> {
    let document = xml_to_value(xml).ok()?;
    let fault = document.root.get("Body")?.get("Fault")?;
    Some(fault_text(fault))
}

fn fault_error(fault: &Value) -> Error {
    Error::new(ErrorKind::Transport).with_message(format!("SOAP fault: {}", fault_text(fault)))
}

fn fault_text(fault: &Value) -> String {
    let code = fault.get("faultcode").and_then(Value::as_str);
    let text = fault.get("faultstring").and_then(Value::as_str);
    match (code, text) {
        (Some(code), Some(text)) => format!("{code}: {text}"),
        (None, Some(text)) => text.to_string(),
        (Some(code), None) => code.to_string(),
        (None, None) => "unspecified fault".to_string(),
    }
}

fn malformed(message: &str) -> Error {
    Error::new(ErrorKind::Transport).with_message(message.to_string())
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    first_child: Option<String>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Map::new(),
            first_child: None,
            text: String::new(),
        }
    }

    fn push_child(&mut self, name: String, value: Value) {
        if self.first_child.is_none() {
            self.first_child = Some(name.clone());
        }
        insert_child(&mut self.children, name, value);
    }

    fn into_value(self) -> Value {
        if self.children.is_empty() {
            Value::String(self.text)
        } else {
            Value::Object(self.children)
        }
    }
}

fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}

struct Document {
    /// Children of the document element keyed by local name.
    root: Map<String, Value>,
    /// Local name of the first element inside the top-level `Body`, in document order.
    body_first_child: Option<String>,
}

fn xml_to_value(xml: &str) -> Result<Document, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Map<String, Value>> = None;
    let mut body_first_child: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message(format!(
                    "SOAP response is not well-formed XML at byte {}",
                    reader.buffer_position()
                ))
                .with_source(err)
        })?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                stack.push(Frame::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if let Some(parent) = stack.last_mut() {
                    parent.push_child(name, Value::String(String::new()));
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|err| {
                    Error::new(ErrorKind::Transport)
                        .with_message("SOAP response contains an invalid escape")
                        .with_source(err)
                })?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                let Some(frame) = stack.pop() else {
                    return Err(malformed("unbalanced SOAP response"));
                };
                if stack.len() == 1 && frame.name == "Body" && body_first_child.is_none() {
                    body_first_child = frame.first_child.clone();
                }
                match stack.last_mut() {
                    Some(parent) => {
                        let name = frame.name.clone();
                        parent.push_child(name, frame.into_value());
                    }
                    None => root = Some(frame.children),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let root = root.ok_or_else(|| malformed("SOAP response has no document element"))?;
    Ok(Document {
        root,
        body_first_child,
    })
}

#[cfg(test)]
mod tests {
    use super::{decode_response, encode_request, fault_message};
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn request_binds_namespace_and_escapes_payload() {
        let xml = encode_request(
            "http://carwash.example/queue",
            "Authorization",
            "СтрокаJSON",
            r#"{"GarNomer":"<17>","Telephone":"a&b"}"#,
        )
        .expect("encode");
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"xmlns:m="http://carwash.example/queue""#));
        assert!(xml.contains("<m:Authorization><m:СтрокаJSON>"));
        assert!(xml.contains("&lt;17&gt;"));
        assert!(xml.contains("a&amp;b"));
        assert!(!xml.contains("<17>"));
    }

    #[test]
    fn response_return_becomes_json_field() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:AuthorizationResponse xmlns:m="http://carwash.example/queue">
      <m:return xmlns:xs="http://www.w3.org/2001/XMLSchema">{"data":{"isReg":true,"FIO":"Иванов &amp; сын"}}</m:return>
    </m:AuthorizationResponse>
  </soap:Body>
</soap:Envelope>"#;
        let value = decode_response(xml).expect("decode");
        assert_eq!(
            value,
            json!({"return": r#"{"data":{"isReg":true,"FIO":"Иванов & сын"}}"#})
        );
    }

    #[test]
    fn header_is_ignored_and_repeated_elements_become_arrays() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Header><trace>1</trace></s:Header>
  <s:Body>
    <NextRegTimeResponse><slot>09:00</slot><slot>09:30</slot><note/></NextRegTimeResponse>
  </s:Body>
</s:Envelope>"#;
        let value = decode_response(xml).expect("decode");
        assert_eq!(value, json!({"slot": ["09:00", "09:30"], "note": ""}));
    }

    #[test]
    fn first_body_child_is_taken_in_document_order() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <ZetaResponse><return>{"data":1}</return></ZetaResponse>
    <Alpha/>
  </s:Body>
</s:Envelope>"#;
        let value = decode_response(xml).expect("decode");
        assert_eq!(value, json!({"return": r#"{"data":1}"#}));

        let repeated = r#"<Envelope><Body><Item>a</Item><Item>b</Item><Aside/></Body></Envelope>"#;
        assert_eq!(decode_response(repeated).expect("decode"), json!("a"));
    }

    #[test]
    fn cdata_text_is_kept_verbatim() {
        let xml = r#"<Envelope><Body><GetInLineResponse><return><![CDATA[{"data":"<ok>"}]]></return></GetInLineResponse></Body></Envelope>"#;
        let value = decode_response(xml).expect("decode");
        assert_eq!(value, json!({"return": r#"{"data":"<ok>"}"#}));
    }

    #[test]
    fn fault_is_transport_error() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Server</faultcode>
      <faultstring>Неизвестная ошибка</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;
        let err = decode_response(xml).expect_err("fault");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            err.message(),
            Some("SOAP fault: soap:Server: Неизвестная ошибка")
        );
        assert_eq!(
            fault_message(xml).as_deref(),
            Some("soap:Server: Неизвестная ошибка")
        );
    }

    #[test]
    fn documents_without_body_are_rejected() {
        for xml in ["<Envelope/>", "<Envelope><Header/></Envelope>", "not xml at all <"] {
            let err = decode_response(xml).expect_err("invalid");
            assert_eq!(err.kind(), ErrorKind::Transport);
        }
        assert_eq!(fault_message("<Envelope/>"), None);
    }
}
