//! Integration tests for attribute aggregation

pub mod common;
pub mod end_to_end_tests;
pub mod mdq_tests;
pub mod router_tests;
pub mod soap_transport_tests;
