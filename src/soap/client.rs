//! Purpose: Blocking SOAP 1.1 client for the upstream booking service.
//! Exports: `SoapConfig`, `Credentials`, `SoapClient`.
//! Role: Implements `Upstream` (one call per operation) and `Connector` (WSDL discovery).
//! Invariants: Every failure here is `ErrorKind::Transport` except local encoding bugs (`Internal`).
//! Invariants: Credentials are sent as HTTP Basic auth on both WSDL fetch and operation calls.
//! Invariants: Passwords never appear in `Debug` output or error messages.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::envelope::{decode_response, encode_request, fault_message};
use super::wsdl::{ServiceDescription, parse_wsdl};
use crate::core::error::{Error, ErrorKind};
use crate::operation::{Operation, PAYLOAD_PARAMETER};
use crate::upstream::{Connector, Upstream};

type SoapResult<T> = Result<T, Error>;

#[derive(Clone)]
pub struct Credentials {
    login: String,
    password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    fn authorization_header(&self) -> String {
        let token = BASE64_STANDARD.encode(format!("{}:{}", self.login, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct SoapConfig {
    pub wsdl_url: Url,
    pub endpoint: Option<Url>,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
}

impl SoapConfig {
    pub fn new(wsdl_url: &str) -> SoapResult<Self> {
        Ok(Self {
            wsdl_url: parse_http_url(wsdl_url, "--wsdl-url")?,
            endpoint: None,
            credentials: None,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> SoapResult<Self> {
        self.endpoint = Some(parse_http_url(endpoint, "--endpoint")?);
        Ok(self)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }
}

impl Connector for SoapConfig {
    fn connect(&self) -> SoapResult<Arc<dyn Upstream>> {
        Ok(Arc::new(SoapClient::connect(self)?))
    }
}

#[derive(Clone)]
pub struct SoapClient {
    inner: Arc<SoapClientInner>,
}

struct SoapClientInner {
    agent: ureq::Agent,
    endpoint: Url,
    description: ServiceDescription,
    authorization: Option<String>,
}

impl SoapClient {
    /// Fetches the WSDL and resolves the endpoint the operations are posted to.
    pub fn connect(config: &SoapConfig) -> SoapResult<Self> {
        let agent = config.agent();
        let authorization = config
            .credentials
            .as_ref()
            .map(Credentials::authorization_header);

        let mut request = agent.get(config.wsdl_url.as_str());
        if let Some(header) = &authorization {
            request = request.set("Authorization", header);
        }
        let wsdl = match request.call() {
            Ok(response) => read_body(response)?,
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(ErrorKind::Transport)
                    .with_message(format!("WSDL request failed with HTTP {code}"))
                    .with_hint(status_hint(code)));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Transport)
                    .with_message("WSDL request failed")
                    .with_source(err));
            }
        };
        let description = parse_wsdl(&wsdl)?;
        let endpoint = resolve_endpoint(config, &description)?;
        debug!(endpoint = %endpoint, namespace = %description.target_namespace, "resolved upstream service");

        Ok(Self {
            inner: Arc::new(SoapClientInner {
                agent,
                endpoint,
                description,
                authorization,
            }),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn target_namespace(&self) -> &str {
        &self.inner.description.target_namespace
    }

    /// Calls one operation with its single string parameter.
    pub fn call(&self, operation: &str, payload: &str) -> SoapResult<Value> {
        let envelope = encode_request(
            &self.inner.description.target_namespace,
            operation,
            PAYLOAD_PARAMETER,
            payload,
        )?;
        let action = self
            .inner
            .description
            .soap_action(operation)
            .unwrap_or_default();

        let mut request = self
            .inner
            .agent
            .post(self.inner.endpoint.as_str())
            .set("Content-Type", "text/xml; charset=utf-8")
            .set("Accept", "text/xml")
            .set("SOAPAction", &format!("\"{action}\""));
        if let Some(header) = &self.inner.authorization {
            request = request.set("Authorization", header);
        }

        match request.send_string(&envelope) {
            Ok(response) => decode_response(&read_body(response)?),
            Err(ureq::Error::Status(code, response)) => Err(status_error(operation, code, response)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message(format!("{operation} request failed"))
                .with_source(err)),
        }
    }
}

impl Upstream for SoapClient {
    fn invoke(&self, operation: Operation, payload: &str) -> SoapResult<Value> {
        self.call(operation.soap_name(), payload)
    }
}

fn resolve_endpoint(config: &SoapConfig, description: &ServiceDescription) -> SoapResult<Url> {
    if let Some(endpoint) = &config.endpoint {
        return Ok(endpoint.clone());
    }
    if let Some(location) = &description.location {
        return config.wsdl_url.join(location).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("WSDL service location is not a valid URL")
                .with_hint("Pass --endpoint to override the advertised location.")
                .with_source(err)
        });
    }
    warn!("WSDL has no service address; posting to the WSDL URL");
    let mut endpoint = config.wsdl_url.clone();
    endpoint.set_query(None);
    Ok(endpoint)
}

fn status_error(operation: &str, code: u16, response: ureq::Response) -> Error {
    // SOAP 1.1 reports faults with HTTP 500 and a Fault body.
    let fault = response
        .into_string()
        .ok()
        .and_then(|body| fault_message(&body));
    let message = match fault {
        Some(fault) => format!("{operation} failed with HTTP {code}: SOAP fault: {fault}"),
        None => format!("{operation} failed with HTTP {code}"),
    };
    Error::new(ErrorKind::Transport)
        .with_message(message)
        .with_hint(status_hint(code))
}

fn status_hint(code: u16) -> &'static str {
    match code {
        401 | 403 => "Check --login/--password (WSDL_LOGIN/WSDL_PASSWORD).",
        404 => "Check --wsdl-url and --endpoint.",
        _ => "The upstream service reported an error; see server logs.",
    }
}

fn read_body(response: ureq::Response) -> SoapResult<String> {
    response.into_string().map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("failed to read upstream response")
            .with_source(err)
    })
}

fn parse_http_url(value: &str, flag: &str) -> SoapResult<Url> {
    let url = Url::parse(value).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{flag} is not a valid URL"))
            .with_hint("Use a full URL like http://host/base/ws/queue.1cws?wsdl.")
            .with_source(err)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("{flag} has unsupported scheme `{other}`"))
            .with_hint("Use http or https.")),
    }
}

#[cfg(test)]
mod tests {
    use super::{Credentials, SoapConfig, resolve_endpoint};
    use crate::core::error::ErrorKind;
    use crate::soap::wsdl::ServiceDescription;

    #[test]
    fn basic_auth_header_is_base64_of_login_and_password() {
        let credentials = Credentials::new("web", "секрет");
        assert_eq!(
            credentials.authorization_header(),
            "Basic d2ViOtGB0LXQutGA0LXRgg=="
        );
        assert!(!format!("{credentials:?}").contains("секрет"));
    }

    #[test]
    fn config_rejects_non_http_urls() {
        let err = SoapConfig::new("ftp://host/ws?wsdl").expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = SoapConfig::new("not a url").expect_err("parse");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn endpoint_resolution_prefers_override_then_location() {
        let config = SoapConfig::new("http://10.0.0.5/base/ws/queue.1cws?wsdl").expect("config");
        let mut description = ServiceDescription {
            target_namespace: "urn:queue".to_string(),
            ..ServiceDescription::default()
        };

        let endpoint = resolve_endpoint(&config, &description).expect("fallback");
        assert_eq!(endpoint.as_str(), "http://10.0.0.5/base/ws/queue.1cws");

        description.location = Some("/base/ws/other.1cws".to_string());
        let endpoint = resolve_endpoint(&config, &description).expect("location");
        assert_eq!(endpoint.as_str(), "http://10.0.0.5/base/ws/other.1cws");

        let config = config
            .with_endpoint("https://gateway.example/queue")
            .expect("override");
        let endpoint = resolve_endpoint(&config, &description).expect("override");
        assert_eq!(endpoint.as_str(), "https://gateway.example/queue");
    }
}
