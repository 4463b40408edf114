//! Attribute query protocol services

pub mod attribute_query;
pub mod endpoint_selector;
pub mod metadata_resolver;
pub mod query_builder;
pub mod response_parser;
pub mod response_processor;
pub mod transport;

pub use attribute_query::AttributeQueryService;
pub use endpoint_selector::select_endpoint;
pub use metadata_resolver::MetadataResolver;
pub use query_builder::{
    AttributeQuery, NameId, QueryBuilder, QuerySigner, RequestedAttribute, SignedAttributeQuery,
};
pub use response_parser::{parse_response, ParsedAssertion, ParsedResponse};
pub use response_processor::{
    ensure_issuer, ProcessingContext, ResponseProcessor, SignedResponseProcessor,
};
pub use transport::{AttributeQueryTransport, SoapClient};
