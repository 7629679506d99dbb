//! Distributed firewall section reads.

use crate::error::NsxResult;
use crate::models::{self, Section, SectionType};
use crate::transport::{ApiCall, ApiRequest, ApiResponse};

/// Root of the distributed firewall configuration tree.
pub const FIREWALL_CONFIG: &str = "/api/4.0/firewall/globalroot-0/config";

/// Path of a section, e.g. `.../layer3sections/1007`.
pub fn section_path(kind: SectionType, section_id: u64) -> String {
    format!("{FIREWALL_CONFIG}/{}/{section_id}", kind.path_segment())
}

/// Read a section together with its version token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetSection {
    pub section_id: u64,
    pub kind: SectionType,
}

impl GetSection {
    pub fn new(section_id: u64, kind: SectionType) -> Self {
        Self { section_id, kind }
    }
}

impl ApiCall for GetSection {
    type Output = Section;

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::get(section_path(self.kind, self.section_id)))
    }

    fn expected_status(&self) -> u16 {
        200
    }

    fn parse(&self, response: ApiResponse) -> NsxResult<Section> {
        let etag = response.header("etag").map(str::to_owned);
        let mut section: Section = models::decode(response.body())?;
        section.etag = etag;
        Ok(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_section_request() {
        let call = GetSection::new(1007, SectionType::Layer3);
        let req = call.request().unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(
            req.path(),
            "/api/4.0/firewall/globalroot-0/config/layer3sections/1007"
        );
    }

    #[test]
    fn test_get_section_reads_etag() {
        let call = GetSection::new(5, SectionType::Layer2);
        let response = ApiResponse::new(200, r#"<section id="5" name="l2"/>"#)
            .with_header("ETag", "\"1699\"");
        let section = call.parse(response).unwrap();
        assert_eq!(section.id, Some(5));
        assert_eq!(section.version_token(), Some("1699"));
    }
}
