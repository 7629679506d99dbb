mod common;

use common::{dry_run, manifest_file};
use serde_json::Value;

const MANIFEST: &str = r#"
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
    config:
      name: relay-1
      edgeid: edge-7
      vnicindex: "1"
      giaddress: 192.168.1.1
      dhcpserverip: 10.0.0.2
"#;

#[test]
/// creates both resources against the in-memory manager and prints their state
fn test_dry_run_create() {
    let manifest = manifest_file(MANIFEST);
    let out = dry_run(manifest.path(), "create", &["--print-metrics"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let state: Value = serde_json::from_slice(&out.stdout).unwrap();
    let resources = state["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0]["id"], resources[0]["config"]["ruleid"]);
    assert_eq!(resources[0]["config"]["disabled"], false);
    assert_eq!(resources[1]["id"], "relay-1");
    assert!(state.get("error").is_none());

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("nsx_resource_ops"));
    assert!(stderr.contains("nsx_section_token_fetches"));
}

#[test]
/// a missing required field fails the run with a non-zero exit and names the field
fn test_dry_run_validation_failure() {
    let broken = MANIFEST.replace("      direction: inout\n", "");
    let manifest = manifest_file(&broken);
    let out = dry_run(manifest.path(), "create", &[]);
    assert!(!out.status.success());

    let state: Value = serde_json::from_slice(&out.stdout).unwrap();
    let error = state["error"].as_str().unwrap();
    assert!(error.contains("direction argument is required"), "{error}");
    assert!(state["resources"][0].get("id").is_none());
}

#[test]
fn test_missing_manifest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dry_run(&dir.path().join("gone.yaml"), "create", &[]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
/// a state manifest from a previous run can be read, updated and deleted
fn test_dry_run_state_lifecycle() {
    let state = r#"
resources:
  - type: nsx_firewall_rule
    name: web-allow
    id: "1000"
    config:
      ruleid: "1000"
      name: web-allow
      ruletype: LAYER3
      sectionid: 5
      action: deny
      direction: inout
    prior:
      ruleid: "1000"
      name: web-allow
      ruletype: LAYER3
      sectionid: 5
      action: allow
      direction: inout
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
    let manifest = manifest_file(state);
    for action in ["read", "update", "delete"] {
        let out = dry_run(manifest.path(), action, &[]);
        assert!(
            out.status.success(),
            "{action}: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        let report: Value = serde_json::from_slice(&out.stdout).unwrap();
        let resources = report["resources"].as_array().unwrap();
        match action {
            "delete" => assert!(resources.iter().all(|r| r.get("id").is_none())),
            _ => {
                assert_eq!(resources[0]["id"], "1000", "{action}");
                assert_eq!(resources[1]["id"], "relay-1", "{action}");
            }
        }
        if action == "update" {
            assert_eq!(resources[0]["config"]["action"], "deny");
        }
    }
}
