//! Metadata Query (MDQ) protocol source
//!
//! Fetches `{base}/entities/{url-encoded entity id}` and reads the
//! `AttributeAuthorityDescriptor` of the returned `EntityDescriptor`.

use super::{
    AaMetadata, MetadataKey, MetadataRecord, MetadataSource, MetadataSourceError, ServiceEndpoint,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::instrument;

const MDQ_ACCEPT: &str = "application/samlmetadata+xml";

/// Metadata fetched on demand from an MDQ responder
#[derive(Debug, Clone)]
pub struct MdqMetadataSource {
    base_url: String,
    client: reqwest::Client,
    name: String,
}

impl MdqMetadataSource {
    /// Create a source for the responder at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MetadataSourceError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataSourceError::Http(format!("Failed to create HTTP client: {e}")))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let name = format!("mdq:{base_url}");
        Ok(Self {
            base_url,
            client,
            name,
        })
    }

    fn entity_url(&self, entity_id: &str) -> String {
        format!(
            "{}/entities/{}",
            self.base_url,
            urlencoding::encode(entity_id)
        )
    }
}

#[async_trait]
impl MetadataSource for MdqMetadataSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.base_url))]
    async fn get_metadata(
        &self,
        entity_id: &str,
    ) -> Result<Option<MetadataRecord>, MetadataSourceError> {
        let response = self
            .client
            .get(self.entity_url(entity_id))
            .header(reqwest::header::ACCEPT, MDQ_ACCEPT)
            .send()
            .await
            .map_err(|e| MetadataSourceError::Http(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(entity_id = %entity_id, "Entity not known to MDQ responder");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MetadataSourceError::Http(format!(
                "MDQ responder returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| MetadataSourceError::Http(e.to_string()))?;

        Ok(parse_entity_descriptor(&body, entity_id)?.map(MetadataRecord::Single))
    }
}

/// Read Attribute Authority metadata out of an `EntityDescriptor`.
///
/// Returns `None` when the descriptor belongs to another entity or has no
/// `AttributeAuthorityDescriptor`.
pub fn parse_entity_descriptor(
    xml: &str,
    entity_id: &str,
) -> Result<Option<AaMetadata>, MetadataSourceError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut descriptor_entity_id = None;
    let mut in_aa_descriptor = false;
    let mut seen_aa_descriptor = false;
    let mut services: Vec<ServiceEndpoint> = Vec::new();
    let mut keys: Vec<MetadataKey> = Vec::new();
    let mut key_use: Option<String> = None;
    let mut in_certificate = false;

    loop {
        match reader.read_event() {
            Ok(event @ (Event::Start(_) | Event::Empty(_))) => {
                let is_start = matches!(event, Event::Start(_));
                let (Event::Start(e) | Event::Empty(e)) = event else {
                    continue;
                };
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");

                match name {
                    "EntityDescriptor" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"entityID" {
                                descriptor_entity_id =
                                    Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                    }
                    "AttributeAuthorityDescriptor" => {
                        in_aa_descriptor = is_start;
                        seen_aa_descriptor = true;
                    }
                    "AttributeService" if in_aa_descriptor => {
                        let mut binding = String::new();
                        let mut location = None;
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match attr.key.local_name().as_ref() {
                                b"Binding" => binding = value,
                                b"Location" => location = Some(value),
                                _ => {}
                            }
                        }
                        services.push(ServiceEndpoint { binding, location });
                    }
                    "KeyDescriptor" if in_aa_descriptor => {
                        key_use = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.local_name().as_ref() == b"use")
                            .map(|a| a.unescape_value().unwrap_or_default().to_string());
                    }
                    "X509Certificate" if in_aa_descriptor && is_start => {
                        in_certificate = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_certificate {
                    let certificate: String = e
                        .unescape()
                        .unwrap_or_default()
                        .split_whitespace()
                        .collect();
                    let usage = key_use.as_deref();
                    keys.push(MetadataKey {
                        signing: usage != Some("encryption"),
                        encryption: usage != Some("signing"),
                        certificate,
                    });
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"AttributeAuthorityDescriptor" => in_aa_descriptor = false,
                    b"KeyDescriptor" => key_use = None,
                    b"X509Certificate" => in_certificate = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MetadataSourceError::Parse(format!(
                    "XML parse error at {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    match descriptor_entity_id {
        Some(id) if id == entity_id => {}
        Some(id) => {
            tracing::warn!(
                requested = %entity_id,
                returned = %id,
                "MDQ responder returned a different entity"
            );
            return Ok(None);
        }
        None => {
            return Err(MetadataSourceError::Parse(
                "response is not an EntityDescriptor".to_string(),
            ));
        }
    }

    if !seen_aa_descriptor {
        return Ok(None);
    }

    let mut metadata = AaMetadata::new(entity_id);
    metadata.attribute_services = Some(services);
    metadata.keys = keys;
    Ok(Some(metadata))
}
