//! # nsx-api
//!
//! Client side of the NSX manager REST API used by the resource handlers.
//!
//! This library provides:
//! - **Transport contract** ([`Transport`]) that every call goes through, with
//!   per-request headers so a section token never leaks into other calls.
//! - **HTTP client** ([`NsxClient`]) backed by `reqwest`.
//! - **Typed calls** for firewall sections and rules and edge DHCP relays.
//! - **XML wire models** ([`models`]).
//! - **In-memory manager** ([`MemoryManager`]) that enforces section
//!   preconditions, for tests and dry runs.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

pub mod client;
pub mod dhcprelay;
pub mod error;
pub mod fwrules;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod sections;
pub mod transport;

pub use client::{NsxClient, NsxConfig};
pub use error::{NsxError, NsxResult};
pub use memory::MemoryManager;
pub use models::{
    DhcpRelay, Endpoint, RelayAgent, Rule, Section, SectionType, Service, Source, Destination,
};
pub use transport::{ApiCall, ApiRequest, ApiResponse, Transport, TransportExt};
