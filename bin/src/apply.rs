//! Runs one lifecycle operation over every manifest entry, in order.
use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use dhcp_relay::{DhcpRelayAgent, RelaySpec};
use firewall_rule::FirewallRule;
use nsx_core::{
    Resource,
    config::cli::Lifecycle,
    nsx_api::{MemoryManager, Transport, metrics},
    section_guard::RetryPolicy,
    tracing::{debug, error, info},
};
use serde::Serialize;

use crate::manifest::{Entry, Manifest};

/// Resource implementations by type name
pub struct Registry<T: Transport + ?Sized> {
    resources: HashMap<&'static str, Box<dyn Resource<T>>>,
}

impl<T: Transport + ?Sized> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Transport + ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// every resource this binary manages
    pub fn with_defaults(retry_policy: RetryPolicy) -> Self {
        let mut registry = Self::new();
        registry.register(FirewallRule::new(retry_policy));
        registry.register(DhcpRelayAgent);
        registry
    }

    pub fn register<R: Resource<T>>(&mut self, resource: R) {
        self.resources.insert(resource.kind(), Box::new(resource));
    }

    pub fn get(&self, kind: &str) -> Option<&dyn Resource<T>> {
        self.resources.get(kind).map(|r| r.as_ref())
    }
}

/// Outcome of a run: resulting state of every entry processed, and the error
/// that stopped the run, if any
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub resources: Vec<Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

async fn run_one<T: Transport + ?Sized>(
    client: &T,
    registry: &Registry<T>,
    entry: &Entry,
    action: Lifecycle,
) -> Result<Entry> {
    let resource = registry
        .get(&entry.kind)
        .ok_or_else(|| anyhow!("unknown resource type {:?}", entry.kind))?;
    let mut data = entry.data()?;

    let result = match action {
        Lifecycle::Create if data.id().is_some() => {
            debug!(kind = %entry.kind, name = %entry.name, "already created, skipping");
            Ok(())
        }
        Lifecycle::Create => resource.create(client, &mut data).await,
        Lifecycle::Read => resource.read(client, &mut data).await,
        Lifecycle::Update => {
            let prior = entry.prior_data()?;
            resource.update(client, &prior, &mut data).await
        }
        Lifecycle::Delete => resource.delete(client, &mut data).await,
    };

    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::RESOURCE_OPS
        .with_label_values(&[resource.kind(), action.as_str(), outcome])
        .inc();
    result.with_context(|| format!("{} {} {:?}", action.as_str(), entry.kind, entry.name))?;
    Ok(entry.with_state(&data))
}

/// Run `action` over the manifest. Entries are processed one at a time; the
/// first failure stops the run and the entries not reached are reported
/// unchanged.
pub async fn run<T: Transport + ?Sized>(
    client: &T,
    registry: &Registry<T>,
    manifest: &Manifest,
    action: Lifecycle,
) -> Report {
    let mut report = Report::default();
    let mut entries = manifest.resources.iter();
    for entry in entries.by_ref() {
        match run_one(client, registry, entry, action).await {
            Ok(state) => report.resources.push(state),
            Err(err) => {
                error!(kind = %entry.kind, name = %entry.name, "{err:#}");
                report.resources.push(entry.clone());
                report.error = Some(format!("{err:#}"));
                break;
            }
        }
    }
    report.resources.extend(entries.cloned());
    info!(
        action = action.as_str(),
        count = report.resources.len(),
        ok = report.is_ok(),
        "run finished"
    );
    report
}

/// An in-memory manager for dry runs. It holds every firewall section the
/// manifest refers to, in `config` or `prior`, and every object the manifest
/// already knows by id, as last applied.
pub fn dry_run_manager(manifest: &Manifest) -> MemoryManager {
    let manager = MemoryManager::new();
    for entry in &manifest.resources {
        let seeded = match entry.kind.as_str() {
            firewall_rule::KIND => seed_rule(&manager, entry),
            dhcp_relay::KIND => seed_relay(&manager, entry),
            _ => Ok(()),
        };
        if let Err(err) = seeded {
            debug!(kind = %entry.kind, name = %entry.name, ?err, "not seeded for dry run");
        }
    }
    manager
}

fn seed_rule(manager: &MemoryManager, entry: &Entry) -> Result<()> {
    for data in [entry.data()?, entry.prior_data()?] {
        if let Ok((kind, section_id)) = firewall_rule::section_of(data.attrs()) {
            if manager.version(section_id).is_none() {
                manager.add_section(section_id, kind, 1);
            }
        }
    }
    let Some(id) = &entry.id else {
        return Ok(());
    };
    let (_, mut rule) = firewall_rule::rule_from(entry.prior_data()?.attrs())?;
    rule.id = Some(id.clone());
    let section_id = rule.section_id;
    if !manager.insert_rule(section_id, rule) {
        return Err(anyhow!("rule id {id:?} can not be placed in section {section_id}"));
    }
    Ok(())
}

fn seed_relay(manager: &MemoryManager, entry: &Entry) -> Result<()> {
    if entry.id.is_none() {
        return Ok(());
    }
    let spec = RelaySpec::from_attrs(entry.prior_data()?.attrs())?;
    let mut relay = manager.relay(&spec.edge_id).unwrap_or_default();
    relay.add_agent(spec.agent);
    relay.add_server_ip(spec.server_ip);
    manager.set_relay(spec.edge_id, relay);
    Ok(())
}
