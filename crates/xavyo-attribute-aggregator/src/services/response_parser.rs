//! SAML `Response` parsing for attribute query answers

use crate::error::{AggregatorError, AggregatorResult};
use crate::saml::ReturnedAttributes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::ops::Range;

/// Maximum accepted size of a response document (1 MB)
pub(crate) const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// An assertion found in the response
#[derive(Debug, Clone, Default)]
pub struct ParsedAssertion {
    pub id: String,
    pub issuer: Option<String>,
    /// `Subject/NameID` value
    pub subject: Option<String>,
    /// Whether the assertion carries its own signature
    pub signed: bool,
    /// Byte range of the assertion element in the parsed document
    pub span: Range<usize>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Attribute statements, in document order
    pub attributes: ReturnedAttributes,
}

/// A parsed `samlp:Response`
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    /// Top-level status code
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    /// Whether the response itself carries a signature
    pub signed: bool,
    /// Byte range of the response element in the parsed document
    pub span: Range<usize>,
    pub assertions: Vec<ParsedAssertion>,
    pub has_encrypted_assertion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    ResponseIssuer,
    AssertionIssuer,
    SubjectNameId,
    StatusMessage,
    AttributeValue,
}

fn parse_instant(raw: &str) -> AggregatorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AggregatorError::ResponseProcessing(format!("Invalid timestamp {raw}: {e}")))
}

/// Parse the `samlp:Response` returned by the AA.
///
/// Element `ID`s must be unique across the document.
pub fn parse_response(xml: &str) -> AggregatorResult<ParsedResponse> {
    use quick_xml::events::{BytesStart, Event};
    use quick_xml::Reader;

    if xml.len() > MAX_RESPONSE_SIZE {
        return Err(AggregatorError::ResponseProcessing(format!(
            "Response exceeds maximum size ({} > {MAX_RESPONSE_SIZE} bytes)",
            xml.len()
        )));
    }

    fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
        e.attributes()
            .flatten()
            .find(|a| a.key.as_ref() == key)
            .map(|a| a.unescape_value().unwrap_or_default().to_string())
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response: Option<ParsedResponse> = None;
    let mut current: Option<ParsedAssertion> = None;
    // Local names of the open elements
    let mut stack: Vec<String> = Vec::new();
    let mut attribute_name: Option<String> = None;
    let mut attribute_values: Vec<String> = Vec::new();
    let mut text_target: Option<TextTarget> = None;
    let mut text = String::new();
    let mut ids: HashSet<String> = HashSet::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            AggregatorError::ResponseProcessing(format!("XML parse error: {e}"))
        })?;
        let position = reader.buffer_position() as usize;

        let (start, is_empty) = match &event {
            Event::Start(e) => (Some(e), false),
            Event::Empty(e) => (Some(e), true),
            _ => (None, false),
        };

        if let Some(e) = start {
            let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
            let parent = stack.last().map(String::as_str);
            let grandparent = stack.len().checked_sub(2).map(|i| stack[i].as_str());
            // `<` cannot occur unescaped inside a tag
            let tag_start = xml
                .get(..position)
                .and_then(|head| head.rfind('<'))
                .unwrap_or_default();

            if let Some(id) = attr(e, b"ID") {
                if !ids.insert(id.clone()) {
                    return Err(AggregatorError::ResponseProcessing(format!(
                        "Duplicate ID {id} in response"
                    )));
                }
            }

            match (local.as_str(), parent) {
                ("Response", None) => {
                    response = Some(ParsedResponse {
                        id: attr(e, b"ID").unwrap_or_default(),
                        in_response_to: attr(e, b"InResponseTo"),
                        span: tag_start..position,
                        ..ParsedResponse::default()
                    });
                }
                (_, None) => {
                    return Err(AggregatorError::ResponseProcessing(format!(
                        "Expected a SAML Response, found {local}"
                    )));
                }
                ("Issuer", Some("Response")) => text_target = Some(TextTarget::ResponseIssuer),
                ("Issuer", Some("Assertion")) => text_target = Some(TextTarget::AssertionIssuer),
                ("Signature", Some("Response")) => {
                    if let Some(r) = response.as_mut() {
                        r.signed = true;
                    }
                }
                ("Signature", Some("Assertion")) => {
                    if let Some(a) = current.as_mut() {
                        a.signed = true;
                    }
                }
                ("StatusCode", Some("Status")) => {
                    if let Some(r) = response.as_mut() {
                        r.status_code = attr(e, b"Value");
                    }
                }
                ("StatusMessage", Some("Status")) => text_target = Some(TextTarget::StatusMessage),
                ("Assertion", Some("Response")) => {
                    current = Some(ParsedAssertion {
                        id: attr(e, b"ID").unwrap_or_default(),
                        span: tag_start..position,
                        ..ParsedAssertion::default()
                    });
                }
                ("NameID", Some("Subject")) if grandparent == Some("Assertion") => {
                    text_target = Some(TextTarget::SubjectNameId);
                }
                ("EncryptedAssertion", Some("Response")) => {
                    if let Some(r) = response.as_mut() {
                        r.has_encrypted_assertion = true;
                    }
                }
                ("Conditions", Some("Assertion")) => {
                    if let Some(a) = current.as_mut() {
                        a.not_before = attr(e, b"NotBefore")
                            .as_deref()
                            .map(parse_instant)
                            .transpose()?;
                        a.not_on_or_after = attr(e, b"NotOnOrAfter")
                            .as_deref()
                            .map(parse_instant)
                            .transpose()?;
                    }
                }
                ("Attribute", Some("AttributeStatement")) => {
                    attribute_name = attr(e, b"Name");
                    attribute_values.clear();
                    if is_empty {
                        if let (Some(a), Some(name)) = (current.as_mut(), attribute_name.take()) {
                            a.attributes.push(name, Vec::new());
                        }
                    }
                }
                ("AttributeValue", Some("Attribute")) => {
                    if is_empty {
                        attribute_values.push(String::new());
                    } else {
                        text_target = Some(TextTarget::AttributeValue);
                        text.clear();
                    }
                }
                _ => {}
            }

            if !is_empty {
                stack.push(local);
            }
            continue;
        }

        match event {
            Event::Text(e) => {
                let value = e.unescape().map_err(|e| {
                    AggregatorError::ResponseProcessing(format!("XML parse error: {e}"))
                })?;
                match text_target {
                    Some(TextTarget::ResponseIssuer) => {
                        if let Some(r) = response.as_mut() {
                            r.issuer = Some(value.trim().to_string());
                        }
                    }
                    Some(TextTarget::AssertionIssuer) => {
                        if let Some(a) = current.as_mut() {
                            a.issuer = Some(value.trim().to_string());
                        }
                    }
                    Some(TextTarget::SubjectNameId) => {
                        if let Some(a) = current.as_mut() {
                            a.subject = Some(value.trim().to_string());
                        }
                    }
                    Some(TextTarget::StatusMessage) => {
                        if let Some(r) = response.as_mut() {
                            r.status_message = Some(value.trim().to_string());
                        }
                    }
                    Some(TextTarget::AttributeValue) => text.push_str(&value),
                    None => {}
                }
            }
            Event::CData(e) if text_target == Some(TextTarget::AttributeValue) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(_) => {
                let Some(local) = stack.pop() else {
                    continue;
                };
                match local.as_str() {
                    "Issuer" | "NameID" | "StatusMessage" => text_target = None,
                    "AttributeValue" => {
                        if text_target == Some(TextTarget::AttributeValue) {
                            attribute_values.push(std::mem::take(&mut text));
                            text_target = None;
                        }
                    }
                    "Attribute" => {
                        if let (Some(a), Some(name)) = (current.as_mut(), attribute_name.take()) {
                            a.attributes
                                .push(name, std::mem::take(&mut attribute_values));
                        }
                    }
                    "Assertion" if stack.len() == 1 => {
                        if let (Some(r), Some(mut a)) = (response.as_mut(), current.take()) {
                            a.span.end = position;
                            r.assertions.push(a);
                        }
                    }
                    "Response" if stack.is_empty() => {
                        if let Some(r) = response.as_mut() {
                            r.span.end = position;
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let response = response.ok_or_else(|| {
        AggregatorError::ResponseProcessing("Document is not a SAML Response".to_string())
    })?;
    if response.id.is_empty() {
        return Err(AggregatorError::ResponseProcessing(
            "Response has no ID".to_string(),
        ));
    }
    Ok(response)
}
