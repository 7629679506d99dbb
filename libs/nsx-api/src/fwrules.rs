//! Distributed firewall rule calls.
//!
//! Writes are meant to be sent with the section token as `If-Match`; see
//! [`TransportExt::call_if_match`].
//!
//! [`TransportExt::call_if_match`]: crate::transport::TransportExt::call_if_match

use crate::error::{NsxError, NsxResult};
use crate::models::{self, Rule, SectionType};
use crate::sections::section_path;
use crate::transport::{ApiCall, ApiRequest, ApiResponse};

/// Status the manager answers a successful rule create with.
pub const CREATED: u16 = 201;

fn rules_path(kind: SectionType, section_id: u64) -> String {
    format!("{}/rules", section_path(kind, section_id))
}

fn rule_path(kind: SectionType, section_id: u64, rule_id: &str) -> String {
    format!("{}/{rule_id}", rules_path(kind, section_id))
}

fn rule_id(rule: &Rule) -> NsxResult<&str> {
    rule.id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| NsxError::missing("ruleid"))
}

/// Create a rule at the top of its section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRule {
    pub rule: Rule,
    pub kind: SectionType,
}

impl CreateRule {
    pub fn new(rule: Rule, kind: SectionType) -> Self {
        Self { rule, kind }
    }
}

impl ApiCall for CreateRule {
    type Output = Rule;

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::post(rules_path(self.kind, self.rule.section_id))
            .body(models::encode(&self.rule)?))
    }

    fn expected_status(&self) -> u16 {
        CREATED
    }

    /// The manager echoes the created rule; older builds answer with an
    /// empty body and only a `Location` header.
    fn parse(&self, response: ApiResponse) -> NsxResult<Rule> {
        if !response.body().trim().is_empty() {
            let created: Rule = models::decode(response.body())?;
            if created.id.is_some() {
                return Ok(created);
            }
        }
        let id = response
            .header("location")
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NsxError::Codec("created rule carries no id".into()))?;
        Ok(Rule {
            id: Some(id.to_owned()),
            ..self.rule.clone()
        })
    }
}

/// Read one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRule {
    pub section_id: u64,
    pub kind: SectionType,
    pub rule_id: String,
}

impl ApiCall for GetRule {
    type Output = Rule;

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::get(rule_path(
            self.kind,
            self.section_id,
            &self.rule_id,
        )))
    }

    fn expected_status(&self) -> u16 {
        200
    }

    fn parse(&self, response: ApiResponse) -> NsxResult<Rule> {
        models::decode(response.body())
    }
}

/// Replace an existing rule. `rule.id` must be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRule {
    pub rule: Rule,
    pub kind: SectionType,
}

impl UpdateRule {
    pub fn new(rule: Rule, kind: SectionType) -> Self {
        Self { rule, kind }
    }
}

impl ApiCall for UpdateRule {
    type Output = Rule;

    fn request(&self) -> NsxResult<ApiRequest> {
        let id = rule_id(&self.rule)?;
        Ok(
            ApiRequest::put(rule_path(self.kind, self.rule.section_id, id))
                .body(models::encode(&self.rule)?),
        )
    }

    fn expected_status(&self) -> u16 {
        200
    }

    fn parse(&self, response: ApiResponse) -> NsxResult<Rule> {
        if response.body().trim().is_empty() {
            return Ok(self.rule.clone());
        }
        models::decode(response.body())
    }
}

/// Remove a rule from its section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRule {
    pub section_id: u64,
    pub kind: SectionType,
    pub rule_id: String,
}

impl ApiCall for DeleteRule {
    type Output = ();

    fn request(&self) -> NsxResult<ApiRequest> {
        Ok(ApiRequest::delete(rule_path(
            self.kind,
            self.section_id,
            &self.rule_id,
        )))
    }

    fn expected_status(&self) -> u16 {
        204
    }

    fn parse(&self, _response: ApiResponse) -> NsxResult<()> {
        Ok(())
    }
}
