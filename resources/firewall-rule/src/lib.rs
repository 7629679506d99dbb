#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

//! `nsx_firewall_rule`: a distributed firewall rule.
//!
//! Every write goes through [`SectionGuard`], so a rule is only created,
//! changed or removed if its section has not moved since the token was read.

use nsx_core::{
    data::Mapping,
    nsx_api::{
        Endpoint, Rule, Service,
        fwrules::GetRule,
        sections::GetSection,
        models::{Destinations, Services, Sources},
    },
    prelude::*,
    serde_json::Value,
};

pub const KIND: &str = "nsx_firewall_rule";

const ENDPOINT: &[Field] = &[
    Field::string("name"),
    Field::string("type"),
    Field::string("value"),
    Field::bool("isvalid"),
];

const SERVICE: &[Field] = &[
    Field::string("name"),
    Field::string("value"),
    Field::int("dstport"),
    Field::int("protocol"),
    Field::int("subprotocol"),
];

pub const SCHEMA: &[Field] = &[
    Field::string("ruleid").computed(),
    Field::string("name").required(),
    Field::bool("disabled").with_default(FieldDefault::Bool(false)),
    Field::string("ruletype").required(),
    Field::string("logged"),
    Field::string("action").required(),
    Field::set("source", ENDPOINT),
    Field::set("destination", ENDPOINT),
    Field::set("service", SERVICE),
    Field::int("sectionid").required(),
    Field::string("direction").required(),
    Field::string("packettype"),
];

/// Source or destination entry from its configuration block.
pub fn endpoint_from(block: &Attributes) -> NsxResult<Endpoint> {
    Ok(Endpoint {
        name: block.opt_str("name")?.unwrap_or_default().to_owned(),
        kind: block.opt_str("type")?.unwrap_or_default().to_owned(),
        value: block.opt_str("value")?.unwrap_or_default().to_owned(),
        is_valid: block.opt_bool("isvalid")?,
    })
}

/// Configuration block of a source or destination entry.
pub fn endpoint_to_mapping(endpoint: &Endpoint) -> Mapping {
    let mut block = Mapping::new();
    block.insert("name".into(), endpoint.name.clone().into());
    block.insert("type".into(), endpoint.kind.clone().into());
    block.insert("value".into(), endpoint.value.clone().into());
    block.insert("isvalid".into(), endpoint.is_valid.into());
    block
}

fn port(block: &Attributes, key: &str) -> NsxResult<u32> {
    match block.opt_int(key)? {
        None => Ok(0),
        Some(n) => u32::try_from(n)
            .map_err(|_| NsxError::invalid(block.path(key), format!("{n} is out of range"))),
    }
}

/// Service entry from its configuration block.
pub fn service_from(block: &Attributes) -> NsxResult<Service> {
    Ok(Service {
        name: block.opt_str("name")?.unwrap_or_default().to_owned(),
        value: block.opt_str("value")?.unwrap_or_default().to_owned(),
        destination_port: port(block, "dstport")?,
        protocol: port(block, "protocol")?,
        sub_protocol: port(block, "subprotocol")?,
    })
}

/// Configuration block of a service entry.
pub fn service_to_mapping(service: &Service) -> Mapping {
    let mut block = Mapping::new();
    block.insert("name".into(), service.name.clone().into());
    block.insert("value".into(), service.value.clone().into());
    block.insert("dstport".into(), service.destination_port.into());
    block.insert("protocol".into(), service.protocol.into());
    block.insert("subprotocol".into(), service.sub_protocol.into());
    block
}

/// The section a configured rule belongs to.
pub fn section_of(attrs: &Attributes) -> NsxResult<(SectionType, u64)> {
    let kind = attrs.require_str("ruletype")?.parse::<SectionType>()?;
    let section_id = attrs.require_int("sectionid")?;
    Ok((kind, section_id))
}

/// Build the wire rule from configuration.
pub fn rule_from(attrs: &Attributes) -> NsxResult<(SectionType, Rule)> {
    let name = attrs.require_str("name")?.to_owned();
    let disabled = attrs.opt_bool("disabled")?;
    let kind = attrs.require_str("ruletype")?.parse::<SectionType>()?;
    let logged = attrs.opt_str("logged")?.unwrap_or_default().to_owned();
    let action = attrs.require_str("action")?.to_owned();

    let sources = attrs
        .blocks("source")?
        .iter()
        .map(endpoint_from)
        .collect::<NsxResult<Vec<_>>>()?;
    let destinations = attrs
        .blocks("destination")?
        .iter()
        .map(endpoint_from)
        .collect::<NsxResult<Vec<_>>>()?;
    let services = attrs
        .blocks("service")?
        .iter()
        .map(service_from)
        .collect::<NsxResult<Vec<_>>>()?;

    let section_id = attrs.require_int("sectionid")?;
    let direction = attrs.require_str("direction")?.to_owned();
    let packet_type = attrs.opt_str("packettype")?.unwrap_or_default().to_owned();

    let rule = Rule {
        id: attrs.opt_str("ruleid")?.map(str::to_owned),
        disabled,
        logged,
        name,
        action,
        sources: (!sources.is_empty()).then(|| Sources {
            excluded: false,
            items: sources,
        }),
        destinations: (!destinations.is_empty()).then(|| Destinations {
            excluded: false,
            items: destinations,
        }),
        services: (!services.is_empty()).then_some(Services { items: services }),
        section_id,
        direction,
        packet_type,
    };
    Ok((kind, rule))
}

fn set_or_remove(attrs: &mut Attributes, key: &str, value: Value) {
    if nsx_core::data::is_set(&value) {
        attrs.set(key, value);
    } else {
        attrs.remove(key);
    }
}

/// Overwrite configuration with what the manager holds.
pub fn refresh(attrs: &mut Attributes, rule: &Rule) {
    if let Some(id) = &rule.id {
        attrs.set("ruleid", id.clone());
    }
    attrs.set("name", rule.name.clone());
    attrs.set("disabled", rule.disabled);
    attrs.set("action", rule.action.clone());
    attrs.set("direction", rule.direction.clone());
    if rule.section_id != 0 {
        attrs.set("sectionid", rule.section_id);
    }
    set_or_remove(attrs, "logged", rule.logged.clone().into());
    set_or_remove(attrs, "packettype", rule.packet_type.clone().into());

    let endpoints = |items: &[Endpoint]| {
        Value::Array(
            items
                .iter()
                .map(|e| Value::Object(endpoint_to_mapping(e)))
                .collect(),
        )
    };
    set_or_remove(attrs, "source", endpoints(rule.sources()));
    set_or_remove(attrs, "destination", endpoints(rule.destinations()));
    set_or_remove(
        attrs,
        "service",
        Value::Array(
            rule.services()
                .iter()
                .map(|s| Value::Object(service_to_mapping(s)))
                .collect(),
        ),
    );
}

#[derive(Debug, Clone, Default)]
pub struct FirewallRule {
    retry_policy: RetryPolicy,
}

async fn section_gone<T: Transport + ?Sized>(client: &T, section_id: u64, kind: SectionType) -> bool {
    matches!(
        client.call(&GetSection::new(section_id, kind)).await,
        Err(err) if err.is_not_found()
    )
}

impl FirewallRule {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    fn guard<'a, T: Transport + ?Sized>(&self, client: &'a T) -> SectionGuard<'a, T> {
        SectionGuard::with_retry_policy(client, self.retry_policy.clone())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Resource<T> for FirewallRule {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> &'static [Field] {
        SCHEMA
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND))]
    async fn create(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        schema::validate(SCHEMA, data.attrs_mut())?;
        let (kind, mut rule) = rule_from(data.attrs())?;
        rule.id = None;

        let created = self.guard(client).create_rule(&rule, kind).await?;
        let id = created
            .id
            .clone()
            .ok_or_else(|| NsxError::Codec("created rule carries no id".into()))?;
        info!(rule_id = %id, section_id = rule.section_id, name = %rule.name, "created firewall rule");
        data.set_id(id.clone());
        data.attrs_mut().set("ruleid", id);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND, id = ?data.id()))]
    async fn read(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        let Some(rule_id) = data.id().map(str::to_owned) else {
            return Ok(());
        };
        let (kind, section_id) = section_of(data.attrs())?;
        let call = GetRule {
            section_id,
            kind,
            rule_id: rule_id.clone(),
        };
        match client.call(&call).await {
            Ok(rule) => {
                refresh(data.attrs_mut(), &rule);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!(%rule_id, section_id, "firewall rule no longer exists, dropping it");
                data.clear_id();
                data.attrs_mut().remove("ruleid");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Rewrite the rule in place. A rule moving to another section is
    /// deleted from the old one and created in the new one.
    #[instrument(level = "debug", skip_all, fields(kind = KIND, id = ?prior.id()))]
    async fn update(
        &self,
        client: &T,
        prior: &ResourceData,
        data: &mut ResourceData,
    ) -> NsxResult<()> {
        schema::validate(SCHEMA, data.attrs_mut())?;
        let rule_id = data
            .id()
            .or(prior.id())
            .map(str::to_owned)
            .ok_or_else(|| NsxError::missing("ruleid"))?;
        let (kind, mut rule) = rule_from(data.attrs())?;

        let moved = section_of(prior.attrs())
            .is_ok_and(|old| old != (kind, rule.section_id));
        if moved {
            info!(%rule_id, section_id = rule.section_id, "firewall rule changes section, replacing it");
            let mut old = prior.clone().with_id(rule_id);
            self.delete(client, &mut old).await?;
            data.clear_id();
            return self.create(client, data).await;
        }

        rule.id = Some(rule_id);
        let updated = self.guard(client).update_rule(&rule, kind).await?;
        info!(rule_id = ?updated.id, section_id = rule.section_id, "updated firewall rule");
        if let Some(id) = &updated.id {
            data.set_id(id.clone());
        }
        refresh(data.attrs_mut(), &updated);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND, id = ?data.id()))]
    async fn delete(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        let Some(rule_id) = data.id().map(str::to_owned) else {
            return Ok(());
        };
        let (kind, section_id) = section_of(data.attrs())?;
        match self
            .guard(client)
            .delete_rule(section_id, kind, &rule_id)
            .await
        {
            Ok(()) => info!(%rule_id, section_id, "deleted firewall rule"),
            Err(err) if err.is_not_found() => {
                debug!(%rule_id, section_id, "firewall rule already gone")
            }
            // no token could be read: a deleted section takes its rules with it
            Err(err) if err.is_transport() => {
                if !section_gone(client, section_id, kind).await {
                    return Err(err);
                }
                debug!(%rule_id, section_id, "firewall section gone, rule with it")
            }
            Err(err) => return Err(err),
        }
        data.clear_id();
        data.attrs_mut().remove("ruleid");
        Ok(())
    }
}
