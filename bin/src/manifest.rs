//! Resource manifest: the resources to run a lifecycle operation against.
//!
//! ```yaml
//! resources:
//!   - type: nsx_firewall_rule
//!     name: web-allow
//!     id: "1000"          # set once created
//!     config:
//!       name: web-allow
//!       ruletype: LAYER3
//!       sectionid: 5
//!       action: allow
//!       direction: inout
//!     prior:              # last applied config, used by update
//!       ...
//! ```
//!
//! The state printed after a run has the same shape, so it can be fed back in.
use std::path::Path;

use anyhow::{Context, Result};
use nsx_core::{
    Attributes, ResourceData,
    serde_json::{self, Value},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<Value>,
}

impl Entry {
    fn resource_data(&self, value: &Value, what: &str) -> Result<ResourceData> {
        let attrs = Attributes::from_value(value.clone())
            .with_context(|| format!("{what} of {} {:?}", self.kind, self.name))?;
        let data = ResourceData::new(attrs);
        Ok(match &self.id {
            Some(id) => data.with_id(id),
            None => data,
        })
    }

    /// configuration plus the known id
    pub fn data(&self) -> Result<ResourceData> {
        self.resource_data(&self.config, "config")
    }

    /// state last applied, falling back to the current config
    pub fn prior_data(&self) -> Result<ResourceData> {
        match &self.prior {
            Some(prior) => self.resource_data(prior, "prior config"),
            None => self.data(),
        }
    }

    /// entry reflecting `data` after a run
    pub fn with_state(&self, data: &ResourceData) -> Self {
        Self {
            kind: self.kind.clone(),
            name: self.name.clone(),
            id: data.id().map(str::to_owned),
            config: Value::Object(data.attrs().values().clone()),
            prior: None,
        }
    }
}

impl Manifest {
    /// Parse json, falling back to yaml
    pub fn new<S: AsRef<str>>(input: S) -> Result<Self> {
        match serde_json::from_str::<Manifest>(input.as_ref()) {
            Ok(manifest) => Ok(manifest),
            Err(_) => serde_yaml::from_str::<Manifest>(input.as_ref())
                .context("manifest is neither valid json nor yaml"),
        }
    }

    /// Read and parse the manifest at `path`
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::new(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SAMPLE_YAML: &str = r#"
resources:
  - type: nsx_firewall_rule
    name: web-allow
    config:
      name: web-allow
      ruletype: LAYER3
      sectionid: 5
      action: allow
      direction: inout
      source:
        - name: s1
          type: Ipv4Address
          value: 10.0.0.1
          isvalid: true
  - type: nsx_dhcp_relay
    name: relay-1
    id: relay-1
    config:
      name: relay-1
      edgeid: edge-7
      vnicindex: "1"
      giaddress: 192.168.1.1
      dhcpserverip: 10.0.0.2
"#;

    #[test]
    fn test_parse_yaml() {
        let manifest = Manifest::new(SAMPLE_YAML).unwrap();
        assert_eq!(manifest.resources.len(), 2);

        let rule = manifest.resources[0].data().unwrap();
        assert_eq!(rule.id(), None);
        assert_eq!(rule.attrs().require_int("sectionid").unwrap(), 5);
        assert_eq!(rule.attrs().blocks("source").unwrap().len(), 1);

        let relay = manifest.resources[1].data().unwrap();
        assert_eq!(relay.id(), Some("relay-1"));
        assert_eq!(relay.attrs().require_str("vnicindex").unwrap(), "1");
    }

    #[test]
    fn test_state_feeds_back() {
        let manifest = Manifest::new(SAMPLE_YAML).unwrap();
        let entry = &manifest.resources[0];
        let data = entry.data().unwrap().with_id("1000");
        let state = Manifest {
            resources: vec![entry.with_state(&data)],
        };
        let json = serde_json::to_string(&state).unwrap();
        let back = Manifest::new(json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.resources[0].id.as_deref(), Some("1000"));
    }

    #[test]
    fn test_prior_defaults_to_config() {
        let manifest = Manifest::new(SAMPLE_YAML).unwrap();
        let entry = &manifest.resources[1];
        assert_eq!(entry.prior_data().unwrap(), entry.data().unwrap());
    }

    #[test]
    fn test_bad_manifest() {
        assert!(Manifest::new("resources: [1, 2").is_err());
        assert!(Manifest::parse("/nonexistent/nsx.yaml").is_err());
    }
}
