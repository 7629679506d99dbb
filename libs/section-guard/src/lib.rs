//! # section-guard
//!
//! Firewall rules live in sections shared by every actor talking to the
//! manager (other automation runs, operators in the console). Each section
//! carries a version token that changes on every mutation. This crate makes
//! every rule write conditional on that token:
//!
//! 1. read the section's token ([`SectionGuard::fetch_section_token`])
//! 2. send the write with the token as `If-Match`
//! 3. the manager rejects the write with 412 if the section moved in between,
//!    surfaced as [`NsxError::TokenStale`]
//!
//! The fetch and the write are issued back to back; no client-side lock is
//! taken. A failed token read aborts the write. Only stale tokens are retried
//! (fetch again, write again), up to [`RetryPolicy::max_attempts`]; transport
//! failures are returned as is since a rule create is not idempotent.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{fmt, future::Future, time::Duration};

use nsx_api::{
    NsxError, NsxResult, Rule, SectionType, Transport, TransportExt,
    fwrules::{CreateRule, DeleteRule, UpdateRule},
    metrics,
    sections::GetSection,
};
use tracing::{debug, instrument, warn};

/// Default number of fetch/write cycles before a stale token is returned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for stale section tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total fetch/write cycles, including the first one.
    pub max_attempts: u32,
    /// Delay before the second cycle; doubles for each following one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A single cycle, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after `failed` stale cycles.
    pub fn delay(&self, failed: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failed.saturating_sub(1))
    }
}

/// A section's version token, as read right before a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionToken {
    section_id: u64,
    kind: SectionType,
    value: String,
}

impl SectionToken {
    /// Wrap a token value. Blank values are refused: writing with one would
    /// be an unconditional write.
    pub fn new(section_id: u64, kind: SectionType, value: impl Into<String>) -> NsxResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(NsxError::Transport(format!(
                "section {section_id} token unavailable: manager returned an empty token"
            )));
        }
        Ok(Self {
            section_id,
            kind,
            value,
        })
    }

    /// The section this token belongs to.
    pub fn section_id(&self) -> u64 {
        self.section_id
    }

    /// The section's type.
    pub fn kind(&self) -> SectionType {
        self.kind
    }

    /// The raw token, as sent in `If-Match`.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for SectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Issues firewall rule writes conditional on the section token.
#[derive(Debug)]
pub struct SectionGuard<'a, T: ?Sized> {
    client: &'a T,
    retry_policy: RetryPolicy,
}

impl<'a, T: Transport + ?Sized> SectionGuard<'a, T> {
    /// Create a guard with the default retry policy.
    pub fn new(client: &'a T) -> Self {
        Self::with_retry_policy(client, RetryPolicy::default())
    }

    /// Create a guard with a custom retry policy.
    pub fn with_retry_policy(client: &'a T, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
        }
    }

    /// Read the current version token of a section.
    ///
    /// Any failure, including a missing or blank token in an otherwise
    /// successful response, is reported as [`NsxError::Transport`] so that no
    /// write goes out without a usable token.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_section_token(
        &self,
        section_id: u64,
        kind: SectionType,
    ) -> NsxResult<SectionToken> {
        metrics::SECTION_TOKEN_FETCHES.inc();
        let section = self
            .client
            .call(&GetSection::new(section_id, kind))
            .await
            .map_err(|e| {
                warn!(?e, section_id, %kind, "could not read section token");
                NsxError::Transport(format!("section {section_id} token unavailable: {e}"))
            })?;
        let token = section.version_token().ok_or_else(|| {
            NsxError::Transport(format!(
                "section {section_id} token unavailable: no timestamp or ETag in response"
            ))
        })?;
        debug!(section_id, token, "read section token");
        SectionToken::new(section_id, kind, token)
    }

    /// Create `rule` if its section still has version `token`.
    ///
    /// Succeeds only on 201. A 412 becomes [`NsxError::TokenStale`], any
    /// other status [`NsxError::RemoteRejection`].
    pub async fn create_rule_conditional(
        &self,
        rule: &Rule,
        token: &SectionToken,
    ) -> NsxResult<Rule> {
        rule.validate()?;
        check_token(rule.section_id, token)?;
        let call = CreateRule::new(rule.clone(), token.kind());
        let created = self
            .client
            .call_if_match(&call, token.as_str())
            .await
            .map_err(|e| classify(e, token))?;
        debug!(section_id = token.section_id(), rule_id = ?created.id, "created rule");
        Ok(created)
    }

    /// Replace an existing rule (`rule.id` set) if its section still has
    /// version `token`. Succeeds only on 200.
    pub async fn update_rule_conditional(
        &self,
        rule: &Rule,
        token: &SectionToken,
    ) -> NsxResult<Rule> {
        rule.validate()?;
        check_token(rule.section_id, token)?;
        let call = UpdateRule::new(rule.clone(), token.kind());
        self.client
            .call_if_match(&call, token.as_str())
            .await
            .map_err(|e| classify(e, token))
    }

    /// Delete a rule if its section still has version `token`. Succeeds only
    /// on 204.
    pub async fn delete_rule_conditional(
        &self,
        rule_id: &str,
        token: &SectionToken,
    ) -> NsxResult<()> {
        if rule_id.is_empty() {
            return Err(NsxError::missing("ruleid"));
        }
        let call = DeleteRule {
            section_id: token.section_id(),
            kind: token.kind(),
            rule_id: rule_id.to_owned(),
        };
        self.client
            .call_if_match(&call, token.as_str())
            .await
            .map_err(|e| classify(e, token))
    }

    /// Fetch the token and create `rule`, re-fetching on a stale token.
    #[instrument(level = "debug", skip_all, fields(section_id = rule.section_id, %kind))]
    pub async fn create_rule(&self, rule: &Rule, kind: SectionType) -> NsxResult<Rule> {
        rule.validate()?;
        self.with_retry(rule.section_id, kind, move |token| async move {
            self.create_rule_conditional(rule, &token).await
        })
        .await
    }

    /// Fetch the token and update `rule`, re-fetching on a stale token.
    #[instrument(level = "debug", skip_all, fields(section_id = rule.section_id, rule_id = ?rule.id, %kind))]
    pub async fn update_rule(&self, rule: &Rule, kind: SectionType) -> NsxResult<Rule> {
        rule.validate()?;
        if rule.id.as_deref().is_none_or(str::is_empty) {
            return Err(NsxError::missing("ruleid"));
        }
        self.with_retry(rule.section_id, kind, move |token| async move {
            self.update_rule_conditional(rule, &token).await
        })
        .await
    }

    /// Fetch the token and delete a rule, re-fetching on a stale token.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_rule(
        &self,
        section_id: u64,
        kind: SectionType,
        rule_id: &str,
    ) -> NsxResult<()> {
        if rule_id.is_empty() {
            return Err(NsxError::missing("ruleid"));
        }
        self.with_retry(section_id, kind, move |token| async move {
            self.delete_rule_conditional(rule_id, &token).await
        })
        .await
    }

    async fn with_retry<O, F, Fut>(&self, section_id: u64, kind: SectionType, mut op: F) -> NsxResult<O>
    where
        F: FnMut(SectionToken) -> Fut,
        Fut: Future<Output = NsxResult<O>>,
    {
        let mut failed = 0u32;
        loop {
            let token = self.fetch_section_token(section_id, kind).await?;
            match op(token).await {
                Err(err) if err.is_stale() => {
                    failed += 1;
                    if failed >= self.retry_policy.max_attempts {
                        warn!(
                            section_id,
                            attempts = failed,
                            "section token stale on every attempt, giving up"
                        );
                        return Err(err);
                    }
                    let delay = self.retry_policy.delay(failed);
                    debug!(section_id, attempts = failed, ?delay, "section token stale, re-reading");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn check_token(section_id: u64, token: &SectionToken) -> NsxResult<()> {
    if section_id != token.section_id() {
        return Err(NsxError::invalid(
            "sectionid",
            format!(
                "token was read for section {}, rule belongs to section {section_id}",
                token.section_id()
            ),
        ));
    }
    Ok(())
}

/// Turn a precondition failure into [`NsxError::TokenStale`].
fn classify(err: NsxError, token: &SectionToken) -> NsxError {
    match err {
        NsxError::RemoteRejection { status, .. } if status == nsx_api::error::PRECONDITION_FAILED => {
            metrics::SECTION_TOKEN_STALE.inc();
            NsxError::TokenStale {
                section_id: token.section_id(),
                token: token.as_str().to_owned(),
                status,
            }
        }
        other => other,
    }
}
