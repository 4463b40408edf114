//! AttributeService endpoint selection

use crate::error::{AggregatorError, AggregatorResult};
use crate::metadata::AaMetadata;
use crate::saml::BINDING_SOAP;

/// Pick the location of the first `AttributeService` with the SOAP binding.
///
/// Only the first SOAP entry is considered: if it has no location the
/// selection fails even when a later SOAP entry has one.
pub fn select_endpoint(metadata: &AaMetadata) -> AggregatorResult<String> {
    let services = metadata
        .attribute_services
        .as_ref()
        .ok_or_else(|| AggregatorError::EndpointMissing(metadata.entity_id.clone()))?;

    services
        .iter()
        .find(|service| service.binding == BINDING_SOAP)
        .and_then(|service| service.location.as_deref())
        .filter(|location| !location.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AggregatorError::LocationMissing(metadata.entity_id.clone()))
}
