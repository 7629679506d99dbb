//! # nsx-core
//!
//! Shared pieces for the NSX resource handlers: the [`Resource`] lifecycle
//! every handler implements, typed configuration extraction
//! ([`data::Attributes`]), field schemas and the runtime configuration of the
//! `nsx-apply` binary.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
pub use anyhow;
pub use async_trait::async_trait;
pub use nsx_api;
pub use section_guard;
pub use serde_json;
pub use tokio;
pub use tracing;

pub use crate::data::{Attributes, ResourceData};
pub use crate::resource::Resource;

pub mod config;
pub mod data;
pub mod prelude;
pub mod resource;
pub mod schema;
