//! Protocol-level validation of attribute query responses

use crate::error::{AggregatorError, AggregatorResult};
use crate::metadata::AaMetadata;
use crate::models::local_sp::LocalSpConfig;
use crate::saml::{parse_certificate, verify_element, STATUS_SUCCESS};
use crate::services::query_builder::NameId;
use crate::services::response_parser::{ParsedAssertion, ParsedResponse};
use chrono::{Duration, Utc};
use openssl::x509::X509;
use std::ops::Range;

/// Default allowed clock skew for assertion conditions (3 minutes)
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 180;

/// Everything a processor needs to know about the exchange
pub struct ProcessingContext<'a> {
    pub sp: &'a LocalSpConfig,
    pub aa: &'a AaMetadata,
    /// ID of the query the response answers
    pub query_id: &'a str,
    /// Subject the query asked about
    pub subject: &'a NameId,
    /// The response document as received
    pub raw_response: &'a str,
}

/// Validates a response and yields its trusted assertions
pub trait ResponseProcessor: Send + Sync {
    fn process(
        &self,
        ctx: &ProcessingContext<'_>,
        response: ParsedResponse,
    ) -> AggregatorResult<Vec<ParsedAssertion>>;
}

/// Require a non-empty issuer on the response
pub fn ensure_issuer(response: &ParsedResponse) -> AggregatorResult<&str> {
    response
        .issuer
        .as_deref()
        .filter(|issuer| !issuer.is_empty())
        .ok_or(AggregatorError::MissingIssuer)
}

fn rejected(reason: impl Into<String>) -> AggregatorError {
    AggregatorError::ResponseProcessing(reason.into())
}

/// Verify the signature on the exact markup the parser read `id` from
fn verify_span(
    raw: &str,
    span: &Range<usize>,
    id: &str,
    certificates: &[X509],
) -> AggregatorResult<()> {
    let element = raw
        .get(span.clone())
        .ok_or_else(|| rejected(format!("Element {id} is outside the response document")))?;
    verify_element(element, id, certificates).map_err(|e| rejected(format!("{id} signature: {e}")))
}

/// Default processor: signature, status and conditions checks against the
/// AA's metadata
#[derive(Debug, Clone)]
pub struct SignedResponseProcessor {
    clock_skew: Duration,
}

impl Default for SignedResponseProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SKEW_SECS)
    }
}

impl SignedResponseProcessor {
    #[must_use]
    pub fn new(clock_skew_secs: i64) -> Self {
        Self {
            clock_skew: Duration::seconds(clock_skew_secs),
        }
    }

    fn check_conditions(&self, assertion: &ParsedAssertion) -> AggregatorResult<()> {
        let now = Utc::now();
        if let Some(not_before) = assertion.not_before {
            if now + self.clock_skew < not_before {
                return Err(rejected(format!(
                    "Assertion {} is not yet valid (NotBefore {not_before})",
                    assertion.id
                )));
            }
        }
        if let Some(not_on_or_after) = assertion.not_on_or_after {
            if now - self.clock_skew >= not_on_or_after {
                return Err(rejected(format!(
                    "Assertion {} has expired (NotOnOrAfter {not_on_or_after})",
                    assertion.id
                )));
            }
        }
        Ok(())
    }
}

impl ResponseProcessor for SignedResponseProcessor {
    fn process(
        &self,
        ctx: &ProcessingContext<'_>,
        response: ParsedResponse,
    ) -> AggregatorResult<Vec<ParsedAssertion>> {
        let issuer = ensure_issuer(&response)?;
        if issuer != ctx.aa.entity_id {
            return Err(rejected(format!(
                "Issuer {issuer} does not match the queried AA {}",
                ctx.aa.entity_id
            )));
        }

        if let Some(in_response_to) = &response.in_response_to {
            if in_response_to != ctx.query_id {
                return Err(rejected(format!(
                    "InResponseTo {in_response_to} does not match query {}",
                    ctx.query_id
                )));
            }
        }

        let status = response.status_code.as_deref().unwrap_or_default();
        if status != STATUS_SUCCESS {
            return Err(rejected(format!(
                "Unsuccessful status {}{}",
                if status.is_empty() { "(missing)" } else { status },
                response
                    .status_message
                    .as_deref()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            )));
        }

        if response.has_encrypted_assertion {
            return Err(rejected("Encrypted assertions are not supported"));
        }

        let certificates = ctx
            .aa
            .signing_certificates()
            .map(parse_certificate)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rejected(format!("Invalid certificate in AA metadata: {e}")))?;
        if certificates.is_empty() {
            return Err(rejected(format!(
                "No signing certificate for {} in metadata",
                ctx.aa.entity_id
            )));
        }

        if response.signed {
            verify_span(ctx.raw_response, &response.span, &response.id, &certificates)?;
        }

        for assertion in &response.assertions {
            if assertion.signed {
                verify_span(ctx.raw_response, &assertion.span, &assertion.id, &certificates)?;
            } else if !response.signed {
                return Err(rejected(format!(
                    "Neither the response nor assertion {} is signed",
                    assertion.id
                )));
            }

            if let Some(assertion_issuer) = &assertion.issuer {
                if assertion_issuer != &ctx.aa.entity_id {
                    return Err(rejected(format!(
                        "Assertion {} issued by {assertion_issuer}",
                        assertion.id
                    )));
                }
            }

            match assertion.subject.as_deref() {
                Some(subject) if subject == ctx.subject.value => {}
                Some(subject) => {
                    return Err(rejected(format!(
                        "Assertion {} is about {subject}, not the queried subject",
                        assertion.id
                    )));
                }
                None => {
                    return Err(rejected(format!(
                        "Assertion {} has no Subject NameID",
                        assertion.id
                    )));
                }
            }

            self.check_conditions(assertion)?;
        }

        tracing::debug!(
            sp = %ctx.sp.entity_id,
            aa = %ctx.aa.entity_id,
            assertions = response.assertions.len(),
            "Attribute query response accepted"
        );

        Ok(response.assertions)
    }
}
