//! Native GOST configuration generation and the portable export format.
//!
//! The engine config is built as typed structs and serialised with
//! `serde_yaml`, so equal configurations always produce identical bytes.

use crate::gost::types::*;
use crate::gost::validate::{validate_profile, validate_version, validate_yaml_text};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SERVICE_NAME: &str = "service-0";
const CHAIN_NAME: &str = "chain-0";
const HOP_NAME: &str = "hop-0";
const NODE_NAME: &str = "node-0";
const CONNECTOR_TYPE: &str = "mwss";
const WS_PATH: &str = "/ws";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Engine config model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root of the GOST v3 YAML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub services: Vec<ServiceSpec>,
    pub chains: Vec<ChainSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub addr: String,
    pub handler: HandlerSpec,
    pub listener: ListenerSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub name: String,
    pub hops: Vec<HopSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub addr: String,
    pub connector: ConnectorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub auth: AuthSpec,
    pub metadata: ConnectorMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSpec {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMetadata {
    pub host: String,
    pub path: String,
    pub header: BTreeMap<String, String>,
}

/// Map a configuration onto the single-service, single-hop engine layout.
pub fn build_engine_config(config: &ProxyConfiguration) -> EngineConfig {
    EngineConfig {
        services: vec![ServiceSpec {
            name: SERVICE_NAME.into(),
            addr: format!(":{}", config.local_port),
            handler: HandlerSpec {
                kind: "socks5".into(),
                chain: CHAIN_NAME.into(),
            },
            listener: ListenerSpec { kind: "tcp".into() },
        }],
        chains: vec![ChainSpec {
            name: CHAIN_NAME.into(),
            hops: vec![HopSpec {
                name: HOP_NAME.into(),
                nodes: vec![NodeSpec {
                    name: NODE_NAME.into(),
                    addr: config.server_address.clone(),
                    connector: ConnectorSpec {
                        kind: CONNECTOR_TYPE.into(),
                        auth: AuthSpec {
                            username: config.username.clone(),
                            password: config.password.clone(),
                        },
                        metadata: ConnectorMetadata {
                            host: config.server_host().to_string(),
                            path: WS_PATH.into(),
                            header: BTreeMap::new(),
                        },
                    },
                }],
            }],
        }],
    }
}

/// Render the native engine configuration text.
pub fn generate_config(config: &ProxyConfiguration) -> Result<String, ConfigValidationError> {
    serde_yaml::to_string(&build_engine_config(config))
        .map_err(|e| ConfigValidationError::InvalidYamlFormat(e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Export / import document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Portable document shared by the JSON and YAML export paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub server_config: ServerConfigSection,
    pub proxy_settings: ProxySettingsSection,
    #[serde(default)]
    pub rules: Vec<ProxyRule>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigSection {
    pub server_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettingsSection {
    pub local_port: u16,
    #[serde(default)]
    pub is_enabled: bool,
}

impl From<&ProxyProfile> for ExportDocument {
    fn from(profile: &ProxyProfile) -> Self {
        let c = &profile.configuration;
        // Only a numeric port is split out; anything else stays in the address.
        let (address, port) = match split_host_port(&c.server_address) {
            (host, Some(p)) => match p.parse::<u16>() {
                Ok(port) if port.to_string() == p => (host.to_string(), Some(port)),
                _ => (c.server_address.clone(), None),
            },
            (host, None) => (host.to_string(), None),
        };
        Self {
            server_config: ServerConfigSection {
                server_address: address,
                server_port: port,
                username: c.username.clone(),
                password: c.password.clone(),
            },
            proxy_settings: ProxySettingsSection {
                local_port: c.local_port,
                is_enabled: c.enabled,
            },
            rules: profile.rules.clone(),
            version: c.schema_version.clone(),
        }
    }
}

impl ExportDocument {
    /// Check the version and field invariants, then build the profile.
    pub fn into_profile(self) -> Result<ProxyProfile, ConfigValidationError> {
        validate_version(&self.version)?;
        let server = self.server_config;
        let server_address = match server.server_port {
            Some(port) => format!("{}:{}", server.server_address, port),
            None => server.server_address,
        };
        let profile = ProxyProfile {
            configuration: ProxyConfiguration {
                server_address,
                username: server.username,
                password: server.password,
                local_port: self.proxy_settings.local_port,
                enabled: self.proxy_settings.is_enabled,
                schema_version: self.version,
            },
            rules: self.rules,
        };
        validate_profile(&profile)?;
        Ok(profile)
    }
}

/// Serialise a profile to the portable JSON document.
pub fn export_config(profile: &ProxyProfile) -> Result<Vec<u8>, ConfigValidationError> {
    serde_json::to_vec_pretty(&ExportDocument::from(profile))
        .map_err(|e| ConfigValidationError::InvalidJsonFormat(e.to_string()))
}

/// Parse and validate a portable JSON document. Nothing is returned unless
/// the whole document is acceptable.
pub fn import_config(bytes: &[u8]) -> Result<ProxyProfile, ConfigValidationError> {
    let doc: ExportDocument = serde_json::from_slice(bytes)
        .map_err(|e| ConfigValidationError::InvalidJsonFormat(e.to_string()))?;
    doc.into_profile()
}

/// Serialise a profile to the portable document in YAML syntax.
pub fn export_config_yaml(profile: &ProxyProfile) -> Result<String, ConfigValidationError> {
    serde_yaml::to_string(&ExportDocument::from(profile))
        .map_err(|e| ConfigValidationError::InvalidYamlFormat(e.to_string()))
}

/// YAML counterpart of [`import_config`].
pub fn import_config_yaml(text: &str) -> Result<ProxyProfile, ConfigValidationError> {
    validate_yaml_text(text)?;
    let doc: ExportDocument = serde_yaml::from_str(text)
        .map_err(|e| ConfigValidationError::InvalidYamlFormat(e.to_string()))?;
    doc.into_profile()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> ProxyConfiguration {
        ProxyConfiguration {
            server_address: "proxy.example.com:443".into(),
            username: "u".into(),
            password: "p".into(),
            local_port: 1080,
            enabled: true,
            schema_version: "1.0".into(),
        }
    }

    fn profile() -> ProxyProfile {
        ProxyProfile {
            configuration: scenario(),
            rules: vec![
                ProxyRule::new("*.corp.example", RuleAction::Direct).with_description("intranet"),
                ProxyRule::new("ads.*", RuleAction::Reject).disabled(),
            ],
        }
    }

    // ── Generation ──────────────────────────────────────────────

    #[test]
    fn scenario_service_and_node_addresses() {
        let text = generate_config(&scenario()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(doc["services"][0]["addr"].as_str(), Some(":1080"));
        assert_eq!(doc["services"][0]["handler"]["type"].as_str(), Some("socks5"));
        assert_eq!(doc["services"][0]["handler"]["chain"].as_str(), Some("chain-0"));
        let node = &doc["chains"][0]["hops"][0]["nodes"][0];
        assert_eq!(node["addr"].as_str(), Some("proxy.example.com:443"));
        assert_eq!(node["connector"]["type"].as_str(), Some("mwss"));
        assert_eq!(node["connector"]["auth"]["username"].as_str(), Some("u"));
        assert_eq!(node["connector"]["metadata"]["host"].as_str(), Some("proxy.example.com"));
        assert_eq!(node["connector"]["metadata"]["path"].as_str(), Some("/ws"));
        assert!(node["connector"]["metadata"]["header"]
            .as_mapping()
            .map(|m| m.is_empty())
            .unwrap_or(false));
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate_config(&scenario()).unwrap();
        let b = generate_config(&scenario().clone()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn generation_tracks_changes() {
        let mut other = scenario();
        other.local_port = 1081;
        assert_ne!(generate_config(&scenario()).unwrap(), generate_config(&other).unwrap());
    }

    #[test]
    fn generated_text_parses_back() {
        let text = generate_config(&scenario()).unwrap();
        let parsed: EngineConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, build_engine_config(&scenario()));
    }

    // ── JSON export / import ────────────────────────────────────

    #[test]
    fn export_schema_shape() {
        let bytes = export_config(&profile()).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["serverConfig"]["serverAddress"], "proxy.example.com");
        assert_eq!(v["serverConfig"]["serverPort"], 443);
        assert_eq!(v["serverConfig"]["username"], "u");
        assert_eq!(v["proxySettings"]["localPort"], 1080);
        assert_eq!(v["rules"][0]["pattern"], "*.corp.example");
        assert_eq!(v["rules"][1]["isEnabled"], false);
        assert_eq!(v["version"], "1.0");
    }

    #[test]
    fn json_round_trip() {
        let p = profile();
        assert_eq!(import_config(&export_config(&p).unwrap()).unwrap(), p);
    }

    #[test]
    fn json_round_trip_without_port_and_disabled() {
        let mut p = profile();
        p.configuration.server_address = "10.0.0.7".into();
        p.configuration.enabled = false;
        let bytes = export_config(&p).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v["serverConfig"].get("serverPort").is_none());
        assert_eq!(import_config(&bytes).unwrap(), p);
    }

    #[test]
    fn truncated_json_rejected() {
        let bytes = export_config(&profile()).unwrap();
        let cut = &bytes[..bytes.len() / 2];
        assert!(matches!(
            import_config(cut),
            Err(ConfigValidationError::InvalidJsonFormat(_))
        ));
        assert!(matches!(
            import_config(b"not json"),
            Err(ConfigValidationError::InvalidJsonFormat(_))
        ));
    }

    #[test]
    fn incompatible_version_rejected() {
        let mut p = profile();
        p.configuration.schema_version = "9.9".into();
        let bytes = export_config(&p).unwrap();
        assert_eq!(
            import_config(&bytes),
            Err(ConfigValidationError::IncompatibleVersion("9.9".into()))
        );
    }

    #[test]
    fn import_validates_enabled_profile() {
        let json = br#"{
            "serverConfig": {"serverAddress": "proxy.example.com", "serverPort": 443, "username": "", "password": "p"},
            "proxySettings": {"localPort": 1080, "isEnabled": true},
            "rules": [],
            "version": "1.0"
        }"#;
        assert_eq!(import_config(json), Err(ConfigValidationError::EmptyCredentials));
    }

    #[test]
    fn import_accepts_missing_optional_fields() {
        let json = br#"{
            "serverConfig": {"serverAddress": "h.example", "username": "u", "password": "p"},
            "proxySettings": {"localPort": 2080},
            "version": "1.0"
        }"#;
        let p = import_config(json).unwrap();
        assert_eq!(p.configuration.server_address, "h.example");
        assert_eq!(p.configuration.local_port, 2080);
        assert!(!p.configuration.enabled);
        assert!(p.rules.is_empty());
    }

    // ── YAML export / import ────────────────────────────────────

    #[test]
    fn yaml_round_trip() {
        let p = profile();
        let text = export_config_yaml(&p).unwrap();
        assert!(text.contains("serverConfig"));
        assert_eq!(import_config_yaml(&text).unwrap(), p);
    }

    #[test]
    fn empty_yaml_rejected() {
        assert!(matches!(
            import_config_yaml(""),
            Err(ConfigValidationError::InvalidYamlFormat(_))
        ));
    }
}
