#![allow(missing_docs)] // lazy_static items don't carry docstrings well

//! # metrics
//!
//! request and section-token statistics
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

lazy_static! {
    /// requests sent to the manager, by method and response status
    pub static ref API_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "nsx_api_requests",
        "requests sent to the NSX manager",
        &["method", "status"]
    )
    .unwrap();

    /// requests that failed before a response was received
    pub static ref API_TRANSPORT_ERRORS: IntCounter = register_int_counter!(
        "nsx_api_transport_errors",
        "NSX manager requests failing at the transport level"
    )
    .unwrap();

    /// section token reads
    pub static ref SECTION_TOKEN_FETCHES: IntCounter = register_int_counter!(
        "nsx_section_token_fetches",
        "firewall section version tokens fetched"
    )
    .unwrap();

    /// conditional writes rejected because the section token was stale
    pub static ref SECTION_TOKEN_STALE: IntCounter = register_int_counter!(
        "nsx_section_token_stale",
        "conditional writes rejected with a stale section token"
    )
    .unwrap();

    /// resource lifecycle operations, by resource kind, action and outcome
    pub static ref RESOURCE_OPS: IntCounterVec = register_int_counter_vec!(
        "nsx_resource_ops",
        "resource lifecycle operations",
        &["kind", "action", "outcome"]
    )
    .unwrap();
}
