//! Synchronous SAML SOAP binding transport
//!
//! The query is posted in a SOAP 1.1 envelope and the AA answers in the HTTP
//! response. No redirects are followed.

use crate::error::{AggregatorError, AggregatorResult};
use crate::saml::NS_SOAP_ENV;
use crate::services::query_builder::SignedAttributeQuery;
use crate::services::response_parser::MAX_RESPONSE_SIZE;
use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

/// `SOAPAction` header value mandated by the SAML SOAP binding
pub const SOAP_ACTION: &str = "http://www.oasis-open.org/committees/security";

/// Default timeout for the whole query exchange
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a signed attribute query and returns the AA's `samlp:Response` XML
#[async_trait]
pub trait AttributeQueryTransport: Send + Sync {
    async fn send(&self, query: &SignedAttributeQuery) -> AggregatorResult<String>;
}

/// SOAP-over-HTTP client
#[derive(Debug, Clone)]
pub struct SoapClient {
    client: reqwest::Client,
}

impl SoapClient {
    pub fn new(timeout: Duration) -> AggregatorResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| AggregatorError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AttributeQueryTransport for SoapClient {
    #[instrument(skip(self, query), fields(endpoint = %query.destination(), query_id = %query.id()))]
    async fn send(&self, query: &SignedAttributeQuery) -> AggregatorResult<String> {
        tracing::debug!(query = %query.xml(), "Sending attribute query");

        let response = self
            .client
            .post(query.destination())
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(soap_envelope(query.xml()))
            .send()
            .await
            .map_err(|e| AggregatorError::QueryTransport(e.to_string()))?;

        let status = response.status();
        let body = read_body(response, MAX_RESPONSE_SIZE).await?;

        if !status.is_success() {
            // AAs report SOAP faults with a 500; surface the fault text when present
            let detail = match extract_soap_response(&body) {
                Err(AggregatorError::QueryTransport(fault)) if fault.starts_with("SOAP fault") => {
                    fault
                }
                _ => format!("HTTP status {status}"),
            };
            return Err(AggregatorError::QueryTransport(detail));
        }

        extract_soap_response(&body)
    }
}

/// Read a response body, giving up once it grows past `limit` bytes
async fn read_body(mut response: reqwest::Response, limit: usize) -> AggregatorResult<String> {
    let too_large = || {
        AggregatorError::QueryTransport(format!("Response exceeds maximum size ({limit} bytes)"))
    };

    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AggregatorError::QueryTransport(e.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8(body)
        .map_err(|e| AggregatorError::QueryTransport(format!("Response is not UTF-8: {e}")))
}

/// Wrap a message in a SOAP 1.1 envelope
#[must_use]
pub fn soap_envelope(message: &str) -> String {
    let mut xml = String::with_capacity(message.len() + 256);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<SOAP-ENV:Envelope xmlns:SOAP-ENV=\"");
    xml.push_str(NS_SOAP_ENV);
    xml.push_str("\"><SOAP-ENV:Body>");
    xml.push_str(message);
    xml.push_str("</SOAP-ENV:Body></SOAP-ENV:Envelope>");
    xml
}

/// Extract the raw `samlp:Response` element from a SOAP envelope.
///
/// A `Fault` in the body, or a body without a `Response`, is a transport
/// error.
pub fn extract_soap_response(envelope: &str) -> AggregatorResult<String> {
    use quick_xml::events::Event;
    use quick_xml::name::QName;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(envelope);
    reader.config_mut().trim_text(true);

    let mut in_body = false;
    let mut in_fault = false;
    let mut in_fault_string = false;
    let mut fault_string: Option<String> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Body" => in_body = true,
                b"Fault" if in_body => in_fault = true,
                b"faultstring" if in_fault => in_fault_string = true,
                b"Response" if in_body && !in_fault => {
                    let name = e.name().as_ref().to_vec();
                    reader.read_to_end(QName(&name)).map_err(|e| {
                        AggregatorError::QueryTransport(format!("Malformed SOAP response: {e}"))
                    })?;
                    let end = reader.buffer_position() as usize;
                    return Ok(envelope[before..end].trim().to_string());
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if in_body => match e.local_name().as_ref() {
                b"Fault" => in_fault = true,
                b"Response" if !in_fault => {
                    let end = reader.buffer_position() as usize;
                    return Ok(envelope[before..end].trim().to_string());
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_fault_string => {
                fault_string = Some(e.unescape().unwrap_or_default().to_string());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"faultstring" => in_fault_string = false,
                b"Body" => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AggregatorError::QueryTransport(format!(
                    "Malformed SOAP response: {e}"
                )));
            }
            _ => {}
        }
    }

    if in_fault {
        return Err(AggregatorError::QueryTransport(format!(
            "SOAP fault: {}",
            fault_string.unwrap_or_else(|| "unspecified".to_string())
        )));
    }

    Err(AggregatorError::QueryTransport(
        "SOAP body does not contain a SAML Response".to_string(),
    ))
}
