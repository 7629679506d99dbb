//! nsx-core prelude

pub use crate::{
    anyhow::{self, Context, Result},
    async_trait,
    data::{Attributes, ResourceData},
    nsx_api::{self, NsxError, NsxResult, SectionType, Transport, TransportExt},
    resource::Resource,
    schema::{self, Field, FieldDefault},
    section_guard::{RetryPolicy, SectionGuard},
    tokio,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::sync::Arc;
