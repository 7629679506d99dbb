#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

//! `nsx_dhcp_relay`: one relay agent (interface + gateway address) on an
//! edge's DHCP relay configuration.
//!
//! The relay endpoint has no version token, so changes are a plain
//! read-modify-write of the edge's whole relay configuration. Last writer
//! wins: callers must not run two writes against the same edge at once.

use std::net::IpAddr;

use nsx_core::{
    nsx_api::{
        DhcpRelay, RelayAgent,
        dhcprelay::{DeleteRelay, GetRelay, UpdateRelay},
    },
    prelude::*,
};

pub const KIND: &str = "nsx_dhcp_relay";

pub const SCHEMA: &[Field] = &[
    Field::string("name").required(),
    Field::string("edgeid").required(),
    Field::string("vnicindex").required(),
    Field::string("giaddress").required(),
    Field::string("dhcpserverip").required(),
];

/// Configured relay agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySpec {
    pub name: String,
    pub edge_id: String,
    pub agent: RelayAgent,
    pub server_ip: String,
}

fn ip(attrs: &Attributes, key: &str) -> NsxResult<String> {
    let value = attrs.require_str(key)?;
    value
        .parse::<IpAddr>()
        .map_err(|e| NsxError::invalid(attrs.path(key), format!("{value:?}: {e}")))?;
    Ok(value.to_owned())
}

impl RelaySpec {
    pub fn from_attrs(attrs: &Attributes) -> NsxResult<Self> {
        let name = attrs.require_str("name")?.to_owned();
        let edge_id = attrs.require_str("edgeid")?.to_owned();
        let vnic_index = attrs.require_str("vnicindex")?;
        let gi_address = ip(attrs, "giaddress")?;
        let server_ip = ip(attrs, "dhcpserverip")?;
        Ok(Self {
            name,
            edge_id,
            agent: RelayAgent::new(vnic_index, gi_address),
            server_ip,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DhcpRelayAgent;

impl DhcpRelayAgent {
    async fn fetch<T: Transport + ?Sized>(client: &T, edge_id: &str) -> NsxResult<DhcpRelay> {
        client.call(&GetRelay::new(edge_id)).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Resource<T> for DhcpRelayAgent {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> &'static [Field] {
        SCHEMA
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND))]
    async fn create(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        schema::validate(SCHEMA, data.attrs_mut())?;
        let spec = RelaySpec::from_attrs(data.attrs())?;

        let mut relay = Self::fetch(client, &spec.edge_id).await?;
        let added = relay.add_agent(spec.agent.clone());
        let server_added = relay.add_server_ip(spec.server_ip.clone());
        if added || server_added {
            client
                .call(&UpdateRelay {
                    edge_id: spec.edge_id.clone(),
                    relay,
                })
                .await?;
            info!(
                edge_id = %spec.edge_id,
                vnic_index = %spec.agent.vnic_index,
                gi_address = %spec.agent.gi_address,
                "added dhcp relay agent"
            );
        } else {
            debug!(edge_id = %spec.edge_id, "dhcp relay agent already configured");
        }
        data.set_id(spec.name);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND, id = ?data.id()))]
    async fn read(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        if data.id().is_none() {
            return Ok(());
        }
        let spec = RelaySpec::from_attrs(data.attrs())?;
        let relay = Self::fetch(client, &spec.edge_id).await?;
        if !relay.has_agent(&spec.agent) {
            warn!(edge_id = %spec.edge_id, vnic_index = %spec.agent.vnic_index, "dhcp relay agent no longer configured, dropping it");
            data.clear_id();
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(kind = KIND, id = ?data.id()))]
    async fn delete(&self, client: &T, data: &mut ResourceData) -> NsxResult<()> {
        if data.id().is_none() {
            return Ok(());
        }
        let spec = RelaySpec::from_attrs(data.attrs())?;
        let mut relay = Self::fetch(client, &spec.edge_id).await?;

        if !relay.remove_agent(&spec.agent) {
            debug!(edge_id = %spec.edge_id, "dhcp relay agent already gone");
        } else if relay.agents().is_empty() {
            client
                .call(&DeleteRelay {
                    edge_id: spec.edge_id.clone(),
                })
                .await?;
            info!(edge_id = %spec.edge_id, "removed last dhcp relay agent, relay config deleted");
        } else {
            client
                .call(&UpdateRelay {
                    edge_id: spec.edge_id.clone(),
                    relay,
                })
                .await?;
            info!(edge_id = %spec.edge_id, vnic_index = %spec.agent.vnic_index, "removed dhcp relay agent");
        }
        data.clear_id();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nsx_core::{
        nsx_api::MemoryManager,
        serde_json::{Value, json},
    };
    use tracing_test::traced_test;

    use super::*;

    const EDGE: &str = "edge-7";

    fn config(vnic: &str, gi: &str) -> Value {
        json!({
            "name": format!("relay-{vnic}"),
            "edgeid": EDGE,
            "vnicindex": vnic,
            "giaddress": gi,
            "dhcpserverip": "10.0.0.2",
        })
    }

    fn data(value: Value) -> ResourceData {
        ResourceData::new(Attributes::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn test_create_appends_agent() {
        let manager = MemoryManager::new();
        let mut existing = DhcpRelay::default();
        existing.add_agent(RelayAgent::new("9", "192.168.9.1"));
        manager.set_relay(EDGE, existing);

        let mut data = data(config("1", "192.168.1.1"));
        DhcpRelayAgent.create(&manager, &mut data).await.unwrap();
        assert_eq!(data.id(), Some("relay-1"));

        let relay = manager.relay(EDGE).unwrap();
        assert_eq!(relay.agents().len(), 2);
        assert!(relay.has_agent(&RelayAgent::new("1", "192.168.1.1")));
        assert_eq!(relay.relay_server.ip_addresses, vec!["10.0.0.2".to_owned()]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create_is_idempotent() {
        let manager = MemoryManager::new();
        DhcpRelayAgent
            .create(&manager, &mut data(config("1", "192.168.1.1")))
            .await
            .unwrap();
        let writes = manager.write_count();

        DhcpRelayAgent
            .create(&manager, &mut data(config("1", "192.168.1.1")))
            .await
            .unwrap();
        assert_eq!(manager.write_count(), writes);
        assert_eq!(manager.relay(EDGE).unwrap().agents().len(), 1);
        assert!(logs_contain("dhcp relay agent already configured"));
    }

    #[tokio::test]
    async fn test_missing_or_bad_field_makes_no_call() {
        let manager = MemoryManager::new();
        for field in ["name", "edgeid", "vnicindex", "giaddress", "dhcpserverip"] {
            let mut value = config("1", "192.168.1.1");
            value.as_object_mut().unwrap().remove(field);
            let err = DhcpRelayAgent
                .create(&manager, &mut data(value))
                .await
                .unwrap_err();
            assert!(
                matches!(err, NsxError::MissingField { field: ref f } if f == field),
                "{field}: {err:?}"
            );
        }
        let err = DhcpRelayAgent
            .create(&manager, &mut data(config("1", "not-an-ip")))
            .await
            .unwrap_err();
        assert!(matches!(err, NsxError::InvalidField { ref field, .. } if field == "giaddress"));
        assert_eq!(manager.request_count(), 0);
    }

    #[tokio::test]
    async fn test_read_detects_removed_agent() {
        let manager = MemoryManager::new();
        let mut data = data(config("1", "192.168.1.1"));
        DhcpRelayAgent.create(&manager, &mut data).await.unwrap();

        DhcpRelayAgent.read(&manager, &mut data).await.unwrap();
        assert_eq!(data.id(), Some("relay-1"));

        manager.set_relay(EDGE, DhcpRelay::default());
        DhcpRelayAgent.read(&manager, &mut data).await.unwrap();
        assert_eq!(data.id(), None);
    }

    #[tokio::test]
    async fn test_delete_keeps_other_agents() {
        let manager = MemoryManager::new();
        let mut first = data(config("1", "192.168.1.1"));
        let mut second = data(config("2", "192.168.2.1"));
        DhcpRelayAgent.create(&manager, &mut first).await.unwrap();
        DhcpRelayAgent.create(&manager, &mut second).await.unwrap();

        DhcpRelayAgent.delete(&manager, &mut first).await.unwrap();
        assert_eq!(first.id(), None);
        let relay = manager.relay(EDGE).unwrap();
        assert_eq!(relay.agents(), &[RelayAgent::new("2", "192.168.2.1")]);

        DhcpRelayAgent.delete(&manager, &mut second).await.unwrap();
        assert!(manager.relay(EDGE).is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_agent() {
        let manager = MemoryManager::new();
        let mut data = data(config("1", "192.168.1.1"));
        DhcpRelayAgent.create(&manager, &mut data).await.unwrap();

        let prior = data.clone();
        data.attrs_mut().set("giaddress", "192.168.1.254");
        DhcpRelayAgent
            .update(&manager, &prior, &mut data)
            .await
            .unwrap();

        let relay = manager.relay(EDGE).unwrap();
        assert_eq!(relay.agents(), &[RelayAgent::new("1", "192.168.1.254")]);
        assert_eq!(data.id(), Some("relay-1"));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let manager = MemoryManager::new();
        manager.set_offline(true);
        let mut data = data(config("1", "192.168.1.1"));
        let err = DhcpRelayAgent.create(&manager, &mut data).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(data.id(), None);
    }
}
