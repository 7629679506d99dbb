//! XML wire models for the distributed firewall and edge DHCP relay APIs.
//!
//! Field and element names follow the manager's REST schema; Rust-side names
//! are snake_case. Attributes are mapped with quick-xml's `@` prefix.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{NsxError, NsxResult};

// ---------------------------------------------------------------------------
// Section type
// ---------------------------------------------------------------------------

/// Kind of firewall section a rule lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    /// Ethernet (L2) rules
    Layer2,
    /// IP (L3) rules
    Layer3,
}

impl SectionType {
    /// Path segment used by the firewall config endpoints.
    pub fn path_segment(&self) -> &'static str {
        match self {
            SectionType::Layer2 => "layer2sections",
            SectionType::Layer3 => "layer3sections",
        }
    }

    /// Canonical tag, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Layer2 => "LAYER2",
            SectionType::Layer3 => "LAYER3",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionType {
    type Err = NsxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAYER2" => Ok(SectionType::Layer2),
            "LAYER3" => Ok(SectionType::Layer3),
            other => Err(NsxError::invalid(
                "ruletype",
                format!("{other:?} is not one of LAYER2, LAYER3"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Firewall section
// ---------------------------------------------------------------------------

/// A firewall section as returned by the section read endpoint.
///
/// Only the attributes are of interest; embedded rules are kept so the
/// section can be inspected in tests and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "section")]
pub struct Section {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "@name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "@generationNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generation_number: Option<String>,
    /// Version token; changes on every mutation of the section.
    #[serde(rename = "@timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "rule", default)]
    pub rules: Vec<Rule>,
    /// `ETag` response header, filled in by the section read call.
    #[serde(skip)]
    pub etag: Option<String>,
}

impl Section {
    /// The section's current version token, preferring the `timestamp`
    /// attribute over the `ETag` header. Blank values count as absent.
    pub fn version_token(&self) -> Option<&str> {
        self.timestamp
            .as_deref()
            .or(self.etag.as_deref())
            .map(|t| t.trim_matches('"'))
            .filter(|t| !t.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Firewall rule
// ---------------------------------------------------------------------------

/// Source or destination entry of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(rename = "isValid", default)]
    pub is_valid: bool,
}

/// Rule source entry.
pub type Source = Endpoint;
/// Rule destination entry.
pub type Destination = Endpoint;

/// `<sources>` wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sources {
    #[serde(rename = "@excluded", default)]
    pub excluded: bool,
    #[serde(rename = "source", default)]
    pub items: Vec<Source>,
}

/// `<destinations>` wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destinations {
    #[serde(rename = "@excluded", default)]
    pub excluded: bool,
    #[serde(rename = "destination", default)]
    pub items: Vec<Destination>,
}

/// Service (port/protocol) entry of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(rename = "destinationPort", default, skip_serializing_if = "is_zero")]
    pub destination_port: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub protocol: u32,
    #[serde(rename = "subProtocol", default, skip_serializing_if = "is_zero")]
    pub sub_protocol: u32,
}

/// `<services>` wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Services {
    #[serde(rename = "service", default)]
    pub items: Vec<Service>,
}

/// A distributed firewall rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "rule")]
pub struct Rule {
    /// Server-assigned once created.
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@disabled", default)]
    pub disabled: bool,
    #[serde(rename = "@logged", default, skip_serializing_if = "String::is_empty")]
    pub logged: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Sources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destinations: Option<Destinations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Services>,
    #[serde(rename = "sectionId", default)]
    pub section_id: u64,
    #[serde(default)]
    pub direction: String,
    #[serde(rename = "packetType", default, skip_serializing_if = "String::is_empty")]
    pub packet_type: String,
}

impl Rule {
    /// Check the fields the manager requires before anything is sent.
    pub fn validate(&self) -> NsxResult<()> {
        if self.name.is_empty() {
            return Err(NsxError::missing("name"));
        }
        if self.action.is_empty() {
            return Err(NsxError::missing("action"));
        }
        if self.direction.is_empty() {
            return Err(NsxError::missing("direction"));
        }
        if self.section_id == 0 {
            return Err(NsxError::missing("sectionid"));
        }
        Ok(())
    }

    pub fn sources(&self) -> &[Source] {
        self.sources.as_ref().map(|s| &s.items[..]).unwrap_or(&[])
    }

    pub fn destinations(&self) -> &[Destination] {
        self.destinations
            .as_ref()
            .map(|d| &d.items[..])
            .unwrap_or(&[])
    }

    pub fn services(&self) -> &[Service] {
        self.services.as_ref().map(|s| &s.items[..]).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// DHCP relay
// ---------------------------------------------------------------------------

/// An (interface, gateway address) pair relaying DHCP for one edge vNIC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayAgent {
    #[serde(rename = "vnicIndex")]
    pub vnic_index: String,
    #[serde(rename = "giAddress")]
    pub gi_address: String,
}

impl RelayAgent {
    pub fn new(vnic_index: impl Into<String>, gi_address: impl Into<String>) -> Self {
        Self {
            vnic_index: vnic_index.into(),
            gi_address: gi_address.into(),
        }
    }
}

/// `<relayServer>`: where relayed requests are forwarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    #[serde(rename = "ipAddress", default)]
    pub ip_addresses: Vec<String>,
    #[serde(rename = "fqdn", default)]
    pub fqdns: Vec<String>,
    #[serde(rename = "groupingObjectId", default)]
    pub grouping_object_ids: Vec<String>,
}

/// `<relayAgents>` wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAgents {
    #[serde(rename = "relayAgent", default)]
    pub items: Vec<RelayAgent>,
}

/// Edge DHCP relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "relay")]
pub struct DhcpRelay {
    #[serde(rename = "relayServer", default)]
    pub relay_server: RelayServer,
    #[serde(rename = "relayAgents", default)]
    pub relay_agents: RelayAgents,
}

impl DhcpRelay {
    pub fn agents(&self) -> &[RelayAgent] {
        &self.relay_agents.items
    }

    pub fn has_agent(&self, agent: &RelayAgent) -> bool {
        self.relay_agents.items.contains(agent)
    }

    /// Append `agent` unless it is already present. Returns whether the list
    /// changed.
    pub fn add_agent(&mut self, agent: RelayAgent) -> bool {
        if self.has_agent(&agent) {
            return false;
        }
        self.relay_agents.items.push(agent);
        true
    }

    /// Remove `agent`. Returns whether it was present.
    pub fn remove_agent(&mut self, agent: &RelayAgent) -> bool {
        let before = self.relay_agents.items.len();
        self.relay_agents.items.retain(|a| a != agent);
        before != self.relay_agents.items.len()
    }

    /// Add a relay server address unless it is already listed.
    pub fn add_server_ip(&mut self, ip: impl Into<String>) -> bool {
        let ip = ip.into();
        if self.relay_server.ip_addresses.contains(&ip) {
            return false;
        }
        self.relay_server.ip_addresses.push(ip);
        true
    }
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Serialize a model to its XML representation.
pub fn encode<T: Serialize>(value: &T) -> NsxResult<String> {
    quick_xml::se::to_string(value).map_err(|e| NsxError::Codec(e.to_string()))
}

/// Deserialize a model from XML.
pub fn decode<T: DeserializeOwned>(xml: &str) -> NsxResult<T> {
    quick_xml::de::from_str(xml).map_err(|e| NsxError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> Rule {
        Rule {
            id: None,
            disabled: false,
            logged: "true".into(),
            name: "web-allow".into(),
            action: "allow".into(),
            sources: Some(Sources {
                excluded: false,
                items: vec![Endpoint {
                    name: "s1".into(),
                    value: "10.0.0.1".into(),
                    kind: "Ipv4Address".into(),
                    is_valid: true,
                }],
            }),
            destinations: None,
            services: Some(Services {
                items: vec![Service {
                    name: "https".into(),
                    value: String::new(),
                    destination_port: 443,
                    protocol: 6,
                    sub_protocol: 6,
                }],
            }),
            section_id: 5,
            direction: "inout".into(),
            packet_type: "any".into(),
        }
    }

    #[test]
    fn test_section_type_parse() {
        assert_eq!("LAYER2".parse::<SectionType>().unwrap(), SectionType::Layer2);
        assert_eq!("LAYER3".parse::<SectionType>().unwrap(), SectionType::Layer3);
        let err = "layer3".parse::<SectionType>().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(SectionType::Layer3.path_segment(), "layer3sections");
        assert_eq!(SectionType::Layer2.to_string(), "LAYER2");
    }

    #[test]
    fn test_rule_encoding() {
        let xml = encode(&sample_rule()).unwrap();
        assert!(xml.starts_with("<rule"));
        assert!(xml.contains(r#"disabled="false""#));
        assert!(xml.contains(r#"logged="true""#));
        assert!(xml.contains("<name>web-allow</name>"));
        assert!(xml.contains("<sectionId>5</sectionId>"));
        assert!(xml.contains("<type>Ipv4Address</type>"));
        assert!(xml.contains("<destinationPort>443</destinationPort>"));
        assert!(!xml.contains("<destinations"));
        assert!(!xml.contains(r#" id=""#));
    }

    #[test]
    fn test_rule_decoding_from_manager() {
        let xml = r#"<rule id="1002" disabled="true" logged="false">
            <name>db-deny</name>
            <action>deny</action>
            <sources excluded="false">
                <source><name>a</name><value>10.0.0.1</value><type>Ipv4Address</type><isValid>true</isValid></source>
                <source><name>b</name><value>10.0.0.2</value><type>Ipv4Address</type><isValid>true</isValid></source>
            </sources>
            <sectionId>1007</sectionId>
            <direction>in</direction>
            <packetType>any</packetType>
        </rule>"#;
        let rule: Rule = decode(xml).unwrap();
        assert_eq!(rule.id.as_deref(), Some("1002"));
        assert!(rule.disabled);
        assert_eq!(rule.logged, "false");
        assert_eq!(rule.sources().len(), 2);
        assert_eq!(rule.sources()[1].value, "10.0.0.2");
        assert!(rule.destinations().is_empty());
        assert!(rule.services().is_empty());
        assert_eq!(rule.section_id, 1007);
    }

    #[test]
    fn test_rule_validate() {
        assert!(sample_rule().validate().is_ok());

        let mut rule = sample_rule();
        rule.direction.clear();
        let err = rule.validate().unwrap_err();
        assert!(matches!(err, NsxError::MissingField { ref field } if field == "direction"));

        let mut rule = sample_rule();
        rule.section_id = 0;
        assert!(rule.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_section_token() {
        let xml = r#"<section id="5" name="apps" generationNumber="1500" timestamp="T100" type="LAYER3"></section>"#;
        let mut section: Section = decode(xml).unwrap();
        assert_eq!(section.id, Some(5));
        assert_eq!(section.version_token(), Some("T100"));

        section.timestamp = None;
        assert_eq!(section.version_token(), None);
        section.etag = Some("\"1501\"".into());
        assert_eq!(section.version_token(), Some("1501"));

        section.timestamp = Some("  ".into());
        assert_eq!(section.version_token(), None);
    }

    #[test]
    fn test_relay_agents() {
        let xml = r#"<relay>
            <relayServer><ipAddress>10.1.1.1</ipAddress></relayServer>
            <relayAgents>
                <relayAgent><vnicIndex>9</vnicIndex><giAddress>10.2.0.1</giAddress></relayAgent>
            </relayAgents>
        </relay>"#;
        let mut relay: DhcpRelay = decode(xml).unwrap();
        assert_eq!(relay.agents().len(), 1);

        assert!(relay.add_agent(RelayAgent::new("10", "10.3.0.1")));
        assert!(!relay.add_agent(RelayAgent::new("10", "10.3.0.1")));
        assert!(!relay.add_server_ip("10.1.1.1"));
        assert!(relay.add_server_ip("10.1.1.2"));

        let encoded = encode(&relay).unwrap();
        assert!(encoded.contains("<vnicIndex>10</vnicIndex>"));
        assert!(encoded.contains("<ipAddress>10.1.1.2</ipAddress>"));

        assert!(relay.remove_agent(&RelayAgent::new("9", "10.2.0.1")));
        assert!(!relay.remove_agent(&RelayAgent::new("9", "10.2.0.1")));
        assert_eq!(relay.agents(), &[RelayAgent::new("10", "10.3.0.1")]);
    }

    #[test]
    fn test_empty_relay_decodes() {
        let relay: DhcpRelay = decode("<relay/>").unwrap();
        assert!(relay.agents().is_empty());
        assert!(relay.relay_server.ip_addresses.is_empty());
    }
}
