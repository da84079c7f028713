//! Purpose: Extract the few facts the client needs from a WSDL document.
//! Exports: `ServiceDescription`, `parse_wsdl`.
//! Role: Streaming scan with quick-xml; no schema or type model is built.
//! Invariants: Element matching uses local names so any namespace prefix works.
//! Invariants: The first `address@location` wins (SOAP 1.1 ports are listed first by convention).

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServiceDescription {
    pub target_namespace: String,
    pub location: Option<String>,
    pub soap_actions: HashMap<String, String>,
}

impl ServiceDescription {
    pub fn soap_action(&self, operation: &str) -> Option<&str> {
        self.soap_actions.get(operation).map(String::as_str)
    }
}

pub fn parse_wsdl(xml: &str) -> Result<ServiceDescription, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut description = ServiceDescription::default();
    let mut in_binding = false;
    let mut depth = 0usize;
    let mut current_operation: Option<(String, usize)> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message(format!(
                    "WSDL is not well-formed XML at byte {}",
                    reader.buffer_position()
                ))
                .with_source(err)
        })?;
        match event {
            Event::Start(e) => {
                depth += 1;
                let name = local_name(&e);
                match name.as_str() {
                    "definitions" => {
                        if let Some(ns) = attribute(&e, "targetNamespace")? {
                            description.target_namespace = ns;
                        }
                    }
                    "binding" => in_binding = true,
                    "operation" if in_binding && current_operation.is_none() => {
                        if let Some(operation) = attribute(&e, "name")? {
                            current_operation = Some((operation, depth));
                        }
                    }
                    _ => {}
                }
                visit_leaf(&e, &name, current_operation.as_ref(), &mut description)?;
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                visit_leaf(&e, &name, current_operation.as_ref(), &mut description)?;
            }
            Event::End(e) => {
                if current_operation
                    .as_ref()
                    .is_some_and(|(_, level)| *level == depth)
                {
                    current_operation = None;
                }
                if e.local_name().as_ref() == b"binding" {
                    in_binding = false;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if description.target_namespace.is_empty() {
        return Err(Error::new(ErrorKind::Transport)
            .with_message("WSDL has no targetNamespace")
            .with_hint("Check that --wsdl-url points at the service description, not the endpoint."));
    }
    Ok(description)
}

fn visit_leaf(
    e: &BytesStart<'_>,
    name: &str,
    current_operation: Option<&(String, usize)>,
    description: &mut ServiceDescription,
) -> Result<(), Error> {
    match name {
        "address" if description.location.is_none() => {
            description.location = attribute(e, "location")?;
        }
        "operation" => {
            if let (Some((operation, _)), Some(action)) =
                (current_operation, attribute(e, "soapAction")?)
            {
                description
                    .soap_actions
                    .entry(operation.clone())
                    .or_insert(action);
            }
        }
        _ => {}
    }
    Ok(())
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, Error> {
    let attr = e.try_get_attribute(name).map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("malformed WSDL attribute")
            .with_source(err)
    })?;
    match attr {
        Some(attr) => {
            let value = attr.unescape_value().map_err(|err| {
                Error::new(ErrorKind::Transport)
                    .with_message("malformed WSDL attribute value")
                    .with_source(err)
            })?;
            Ok(Some(value.to_string()))
        }
        None => Ok(None),
    }
}
