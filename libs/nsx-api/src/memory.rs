//! In-memory NSX manager.
//!
//! Serves the same paths as a real manager for firewall sections/rules and
//! edge DHCP relays. Every firewall section keeps a version counter; its
//! token is `T{version}`. Rule writes must carry the current token as
//! `If-Match` (412 otherwise) and bump the version when they succeed.
//!
//! Every request is recorded, so tests can assert how many calls were made
//! and in which order. Faults can be injected: the whole transport can go
//! offline, section reads can fail, and sections can be mutated "by someone
//! else" between a token read and a write.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use tracing::trace;

use crate::error::{NOT_FOUND, NsxError, NsxResult, PRECONDITION_FAILED};
use crate::models::{self, DhcpRelay, Rule, Section, SectionType};
use crate::transport::{ApiRequest, ApiResponse, IF_MATCH, Transport};

/// First id handed out to created rules.
const FIRST_RULE_ID: u64 = 1000;

/// Token text for a section version.
pub fn token_for(version: u64) -> String {
    format!("T{version}")
}

#[derive(Debug)]
struct SectionState {
    kind: SectionType,
    version: u64,
    rules: BTreeMap<u64, Rule>,
}

impl SectionState {
    fn token(&self) -> String {
        token_for(self.version)
    }
}

#[derive(Debug)]
struct Inner {
    sections: HashMap<u64, SectionState>,
    relays: HashMap<String, DhcpRelay>,
    next_rule_id: u64,
    requests: Vec<ApiRequest>,
    offline: bool,
    fail_section_reads: bool,
    blank_section_tokens: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            sections: HashMap::new(),
            relays: HashMap::new(),
            next_rule_id: FIRST_RULE_ID,
            requests: Vec::new(),
            offline: false,
            fail_section_reads: false,
            blank_section_tokens: false,
        }
    }
}

/// A [`Transport`] that plays the manager.
#[derive(Debug, Default)]
pub struct MemoryManager {
    inner: Mutex<Inner>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_section`](Self::add_section).
    pub fn with_section(self, section_id: u64, kind: SectionType, version: u64) -> Self {
        self.add_section(section_id, kind, version);
        self
    }

    pub fn add_section(&self, section_id: u64, kind: SectionType, version: u64) {
        self.inner.lock().sections.insert(
            section_id,
            SectionState {
                kind,
                version,
                rules: BTreeMap::new(),
            },
        );
    }

    /// Current token of a section.
    pub fn token(&self, section_id: u64) -> Option<String> {
        self.inner
            .lock()
            .sections
            .get(&section_id)
            .map(SectionState::token)
    }

    pub fn version(&self, section_id: u64) -> Option<u64> {
        self.inner.lock().sections.get(&section_id).map(|s| s.version)
    }

    /// Simulate another actor mutating the section. Returns the new token.
    pub fn touch_section(&self, section_id: u64) -> Option<String> {
        let mut inner = self.inner.lock();
        let section = inner.sections.get_mut(&section_id)?;
        section.version += 1;
        Some(section.token())
    }

    /// Fail every request at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Answer section reads with 503.
    pub fn fail_section_reads(&self, fail: bool) {
        self.inner.lock().fail_section_reads = fail;
    }

    /// Answer section reads without `timestamp`/`ETag`.
    pub fn blank_section_tokens(&self, blank: bool) {
        self.inner.lock().blank_section_tokens = blank;
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Requests other than `GET`.
    pub fn write_count(&self) -> usize {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| *r.method() != Method::GET)
            .count()
    }

    pub fn rule(&self, section_id: u64, rule_id: &str) -> Option<Rule> {
        let id = rule_id.parse::<u64>().ok()?;
        self.inner
            .lock()
            .sections
            .get(&section_id)?
            .rules
            .get(&id)
            .cloned()
    }

    pub fn rules(&self, section_id: u64) -> Vec<Rule> {
        self.inner
            .lock()
            .sections
            .get(&section_id)
            .map(|s| s.rules.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a rule without going through the API, as an operator using the
    /// console would. Bumps the section version.
    pub fn remove_rule_out_of_band(&self, section_id: u64, rule_id: &str) -> Option<Rule> {
        let id = rule_id.parse::<u64>().ok()?;
        let mut inner = self.inner.lock();
        let section = inner.sections.get_mut(&section_id)?;
        let removed = section.rules.remove(&id)?;
        section.version += 1;
        Some(removed)
    }

    /// Put an already existing rule into a section, keeping its id. The
    /// section version is left alone. Returns false if the section does not
    /// exist or the rule has no numeric id.
    pub fn insert_rule(&self, section_id: u64, mut rule: Rule) -> bool {
        let Some(id) = rule.id.as_deref().and_then(|id| id.parse::<u64>().ok()) else {
            return false;
        };
        let mut inner = self.inner.lock();
        let Some(section) = inner.sections.get_mut(&section_id) else {
            return false;
        };
        rule.section_id = section_id;
        section.rules.insert(id, rule);
        inner.next_rule_id = inner.next_rule_id.max(id + 1);
        true
    }

    /// Delete a whole section without going through the API.
    pub fn remove_section_out_of_band(&self, section_id: u64) -> bool {
        self.inner.lock().sections.remove(&section_id).is_some()
    }

    pub fn relay(&self, edge_id: &str) -> Option<DhcpRelay> {
        self.inner.lock().relays.get(edge_id).cloned()
    }

    pub fn set_relay(&self, edge_id: impl Into<String>, relay: DhcpRelay) {
        self.inner.lock().relays.insert(edge_id.into(), relay);
    }
}

#[async_trait]
impl Transport for MemoryManager {
    async fn execute(&self, request: ApiRequest) -> NsxResult<ApiResponse> {
        let mut inner = self.inner.lock();
        inner.requests.push(request.clone());
        if inner.offline {
            return Err(NsxError::Transport(format!(
                "{} {}: connection refused",
                request.method(),
                request.path()
            )));
        }
        let response = handle(&mut inner, &request);
        trace!(
            method = %request.method(),
            path = request.path(),
            status = response.status_code(),
            "memory manager handled request"
        );
        Ok(response)
    }
}

enum Route<'a> {
    Section(SectionType, u64),
    Rules(SectionType, u64),
    Rule(SectionType, u64, &'a str),
    Relay(&'a str),
    Unknown,
}

fn route(path: &str) -> Route<'_> {
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    match segments.as_slice() {
        ["api", "4.0", "firewall", "globalroot-0", "config", kind, id, rest @ ..] => {
            let kind = match *kind {
                "layer2sections" => SectionType::Layer2,
                "layer3sections" => SectionType::Layer3,
                _ => return Route::Unknown,
            };
            let Ok(id) = id.parse::<u64>() else {
                return Route::Unknown;
            };
            match rest {
                [] => Route::Section(kind, id),
                ["rules"] => Route::Rules(kind, id),
                ["rules", rule_id] => Route::Rule(kind, id, *rule_id),
                _ => Route::Unknown,
            }
        }
        ["api", "4.0", "edges", edge, "dhcp", "config", "relay"] => Route::Relay(*edge),
        _ => Route::Unknown,
    }
}

fn error_body(code: u16, details: &str) -> ApiResponse {
    ApiResponse::new(
        code,
        format!("<error><details>{details}</details><errorCode>{code}</errorCode></error>"),
    )
}

fn encoded<T: serde::Serialize>(status: u16, value: &T) -> ApiResponse {
    match models::encode(value) {
        Ok(body) => ApiResponse::new(status, body),
        Err(e) => error_body(500, &e.to_string()),
    }
}

fn handle(inner: &mut Inner, request: &ApiRequest) -> ApiResponse {
    let method = request.method().clone();
    match route(request.path()) {
        Route::Section(kind, id) if method == Method::GET => section_read(inner, kind, id),
        Route::Rules(kind, id) if method == Method::POST => rule_create(inner, request, kind, id),
        Route::Rule(kind, id, rule_id) => {
            let Ok(rule_id) = rule_id.parse::<u64>() else {
                return error_body(NOT_FOUND, "rule not found");
            };
            match method {
                Method::GET => rule_read(inner, kind, id, rule_id),
                Method::PUT => rule_update(inner, request, kind, id, rule_id),
                Method::DELETE => rule_delete(inner, request, kind, id, rule_id),
                _ => error_body(405, "method not allowed"),
            }
        }
        Route::Relay(edge) => match method {
            Method::GET => encoded(
                200,
                &inner.relays.get(edge).cloned().unwrap_or_default(),
            ),
            Method::PUT => match request.body_str().map(models::decode::<DhcpRelay>) {
                Some(Ok(relay)) => {
                    inner.relays.insert(edge.to_owned(), relay);
                    ApiResponse::new(204, "")
                }
                _ => error_body(400, "invalid relay body"),
            },
            Method::DELETE => {
                inner.relays.remove(edge);
                ApiResponse::new(204, "")
            }
            _ => error_body(405, "method not allowed"),
        },
        Route::Section(..) | Route::Rules(..) => error_body(405, "method not allowed"),
        Route::Unknown => error_body(NOT_FOUND, "no such path"),
    }
}

fn section_mut(
    inner: &mut Inner,
    kind: SectionType,
    id: u64,
) -> Result<&mut SectionState, ApiResponse> {
    match inner.sections.get_mut(&id) {
        Some(section) if section.kind == kind => Ok(section),
        _ => Err(error_body(NOT_FOUND, "section not found")),
    }
}

fn check_precondition(section: &SectionState, request: &ApiRequest) -> Result<(), ApiResponse> {
    match request.header_value(IF_MATCH) {
        Some(token) if token == section.token() => Ok(()),
        Some(_) => Err(error_body(
            PRECONDITION_FAILED,
            "section has been modified, refresh and retry",
        )),
        None => Err(error_body(PRECONDITION_FAILED, "If-Match header is required")),
    }
}

fn section_read(inner: &mut Inner, kind: SectionType, id: u64) -> ApiResponse {
    if inner.fail_section_reads {
        return error_body(503, "service unavailable");
    }
    let blank = inner.blank_section_tokens;
    let section = match section_mut(inner, kind, id) {
        Ok(section) => section,
        Err(resp) => return resp,
    };
    let token = (!blank).then(|| section.token());
    let body = Section {
        id: Some(id),
        name: format!("section-{id}"),
        generation_number: Some(section.version.to_string()),
        timestamp: token.clone(),
        kind: Some(kind.as_str().to_owned()),
        rules: section.rules.values().cloned().collect(),
        etag: None,
    };
    let response = encoded(200, &body);
    match token {
        Some(token) => response.with_header("ETag", format!("\"{token}\"")),
        None => response,
    }
}

fn decode_rule(request: &ApiRequest) -> Result<Rule, ApiResponse> {
    let rule = request
        .body_str()
        .ok_or_else(|| error_body(400, "missing rule body"))
        .and_then(|body| {
            models::decode::<Rule>(body).map_err(|e| error_body(400, &e.to_string()))
        })?;
    rule.validate()
        .map_err(|e| error_body(400, &e.to_string()))?;
    Ok(rule)
}

fn rule_create(inner: &mut Inner, request: &ApiRequest, kind: SectionType, id: u64) -> ApiResponse {
    let rule_id = inner.next_rule_id;
    let section = match section_mut(inner, kind, id) {
        Ok(section) => section,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_precondition(section, request) {
        return resp;
    }
    let mut rule = match decode_rule(request) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };
    rule.id = Some(rule_id.to_string());
    rule.section_id = id;
    section.rules.insert(rule_id, rule.clone());
    section.version += 1;
    inner.next_rule_id += 1;
    encoded(201, &rule).with_header("Location", format!("{}/{rule_id}", request.path()))
}

fn rule_read(inner: &mut Inner, kind: SectionType, id: u64, rule_id: u64) -> ApiResponse {
    let section = match section_mut(inner, kind, id) {
        Ok(section) => section,
        Err(resp) => return resp,
    };
    match section.rules.get(&rule_id) {
        Some(rule) => encoded(200, rule),
        None => error_body(NOT_FOUND, "rule not found"),
    }
}

fn rule_update(
    inner: &mut Inner,
    request: &ApiRequest,
    kind: SectionType,
    id: u64,
    rule_id: u64,
) -> ApiResponse {
    let section = match section_mut(inner, kind, id) {
        Ok(section) => section,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_precondition(section, request) {
        return resp;
    }
    if !section.rules.contains_key(&rule_id) {
        return error_body(NOT_FOUND, "rule not found");
    }
    let mut rule = match decode_rule(request) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };
    rule.id = Some(rule_id.to_string());
    rule.section_id = id;
    section.rules.insert(rule_id, rule.clone());
    section.version += 1;
    encoded(200, &rule)
}

fn rule_delete(
    inner: &mut Inner,
    request: &ApiRequest,
    kind: SectionType,
    id: u64,
    rule_id: u64,
) -> ApiResponse {
    let section = match section_mut(inner, kind, id) {
        Ok(section) => section,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_precondition(section, request) {
        return resp;
    }
    if section.rules.remove(&rule_id).is_none() {
        return error_body(NOT_FOUND, "rule not found");
    }
    section.version += 1;
    ApiResponse::new(204, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fwrules::CreateRule;
    use crate::sections::GetSection;
    use crate::transport::TransportExt;

    fn rule() -> Rule {
        Rule {
            name: "r1".into(),
            action: "allow".into(),
            direction: "inout".into(),
            section_id: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_section_read_reports_token() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 100);
        let section = manager
            .call(&GetSection::new(5, SectionType::Layer3))
            .await
            .unwrap();
        assert_eq!(section.version_token(), Some("T100"));

        let err = manager
            .call(&GetSection::new(5, SectionType::Layer2))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_requires_current_token() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 100);
        let call = CreateRule::new(rule(), SectionType::Layer3);

        let err = manager.call(&call).await.unwrap_err();
        assert_eq!(err.status(), Some(PRECONDITION_FAILED));

        let created = manager.call_if_match(&call, "T100").await.unwrap();
        assert_eq!(created.id.as_deref(), Some("1000"));
        assert_eq!(manager.token(5).as_deref(), Some("T101"));

        let err = manager.call_if_match(&call, "T100").await.unwrap_err();
        assert_eq!(err.status(), Some(PRECONDITION_FAILED));
        assert_eq!(manager.rules(5).len(), 1);
    }

    #[tokio::test]
    async fn test_offline_records_request() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 1);
        manager.set_offline(true);
        let err = manager
            .call(&GetSection::new(5, SectionType::Layer3))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(manager.request_count(), 1);
        assert_eq!(manager.write_count(), 0);
    }

    #[test]
    fn test_touch_section() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 100);
        assert_eq!(manager.touch_section(5).as_deref(), Some("T101"));
        assert_eq!(manager.version(5), Some(101));
        assert_eq!(manager.touch_section(6), None);
    }

    #[tokio::test]
    async fn test_inserted_rule_keeps_id() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 100);
        let mut seeded = rule();
        seeded.id = Some("1500".into());
        assert!(manager.insert_rule(5, seeded));
        assert_eq!(manager.version(5), Some(100));
        assert_eq!(manager.rule(5, "1500").unwrap().name, "r1");

        assert!(!manager.insert_rule(6, rule()));
        assert!(!manager.insert_rule(5, rule()));

        // ids handed out later do not collide with the seeded one
        let call = CreateRule::new(rule(), SectionType::Layer3);
        let created = manager.call_if_match(&call, "T100").await.unwrap();
        assert_eq!(created.id.as_deref(), Some("1501"));
    }

    #[tokio::test]
    async fn test_removed_section_is_not_found() {
        let manager = MemoryManager::new().with_section(5, SectionType::Layer3, 100);
        assert!(manager.remove_section_out_of_band(5));
        assert!(!manager.remove_section_out_of_band(5));
        let err = manager
            .call(&GetSection::new(5, SectionType::Layer3))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
