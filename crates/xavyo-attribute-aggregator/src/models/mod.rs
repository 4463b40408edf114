//! Configuration types for the attribute aggregator

pub mod filter_config;
pub mod local_sp;

pub use filter_config::{
    AttributeNameFormat, AttributeRequestEntry, AttributeRequestList, AttributeRequestSpec,
    FilterConfig, MultiSourcePolicy, NameIdFormat,
};
pub use local_sp::{AuthSourceRegistry, LocalSpConfig, LocalSpSettings};
