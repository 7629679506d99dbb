//! Edge DHCP relay calls.
//!
//! The relay endpoint carries no version token: an update replaces the whole
//! agent list, last writer wins.

use crate::error::NsxResult;
use crate::models::{self, DhcpRelay};
use crate::transport::{ApiCall, ApiRequest, ApiResponse};

fn relay_path(edge_id: &str) -> String {
    format!("/api/4.0/edges/{edge_id}/dhcp/config/relay")
}

/// Read the relay configuration of an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRelay {
    pub edge_id: String,
}

impl GetRelay {
    pub fn new(edge_id: impl Into<String>) -> Self {
        Self {
            edge_id: edge_id.into(),
        }
    }
}

impl ApiCall for GetRelay {
    type Output = DhcpRelay;

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::get(relay_path(&self.edge_id)))
    }

    fn expected_status(&self) -> u16 {
        200
    }

    fn parse(&self, response: ApiResponse) -> NsxResult<DhcpRelay> {
        // an edge without relay config answers with an empty body
        if response.body().trim().is_empty() {
            return Ok(DhcpRelay::default());
        }
        models::decode(response.body())
    }
}

/// Replace the relay configuration of an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRelay {
    pub edge_id: String,
    pub relay: DhcpRelay,
}

impl ApiCall for UpdateRelay {
    type Output = ();

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::put(relay_path(&self.edge_id)).body(models::encode(&self.relay)?))
    }

    fn expected_status(&self) -> u16 {
        204
    }

    fn parse(&self, _response: ApiResponse) -> NsxResult<()> {
        Ok(())
    }
}

/// Remove the relay configuration of an edge entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRelay {
    pub edge_id: String,
}

impl ApiCall for DeleteRelay {
    type Output = ();

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::delete(relay_path(&self.edge_id)))
    }

    fn expected_status(&self) -> u16 {
        204
    }

    fn parse(&self, _response: ApiResponse) -> NsxResult<()> {
        Ok(())
    }
}
