//! Pure validation of proxy configuration and rules.
//!
//! [`validate`] is fail-fast and checks in a fixed order: server address,
//! server port, credentials, local port, rules, schema version. Callers that
//! want every violation call the field-level checks individually.

use crate::gost::types::*;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HOSTNAME_RE: Option<Regex> = Regex::new(
        r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$"
    )
    .ok();
    static ref IPV4_RE: Option<Regex> = Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$").ok();
    static ref RULE_PATTERN_RE: Option<Regex> = Regex::new(r"^[A-Za-z0-9\-._*?]+$").ok();
}

fn matches(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().map_or(false, |re| re.is_match(text))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Whole-object validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a configuration and its rules, reporting the first violation.
pub fn validate(config: &ProxyConfiguration, rules: &[ProxyRule]) -> Result<(), ConfigValidationError> {
    validate_server_address(&config.server_address)?;
    validate_credentials(&config.username, &config.password)?;
    validate_local_port(config.local_port)?;
    validate_rules(rules)?;
    validate_version(&config.schema_version)
}

/// Validate a profile for storage or import.
///
/// Disabled profiles may be incomplete, so only the local port, rules and
/// version are checked for them.
pub fn validate_profile(profile: &ProxyProfile) -> Result<(), ConfigValidationError> {
    if profile.configuration.enabled {
        return validate(&profile.configuration, &profile.rules);
    }
    validate_local_port(profile.configuration.local_port)?;
    validate_rules(&profile.rules)?;
    validate_version(&profile.configuration.schema_version)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Field-level checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `host[:port]` where host is an RFC-1123 hostname or a dotted quad.
pub fn validate_server_address(address: &str) -> Result<(), ConfigValidationError> {
    let (host, port) = split_host_port(address);
    if !is_valid_host(host) {
        return Err(ConfigValidationError::InvalidServerAddress);
    }
    if let Some(port) = port {
        match port.parse::<u32>() {
            Ok(p) if is_valid_port(p) => {}
            _ => return Err(ConfigValidationError::InvalidServerPort),
        }
    }
    Ok(())
}

pub fn validate_credentials(username: &str, password: &str) -> Result<(), ConfigValidationError> {
    if username.is_empty() || password.is_empty() {
        return Err(ConfigValidationError::EmptyCredentials);
    }
    Ok(())
}

pub fn validate_local_port(port: u16) -> Result<(), ConfigValidationError> {
    if !is_valid_port(u32::from(port)) {
        return Err(ConfigValidationError::InvalidLocalPort);
    }
    Ok(())
}

pub fn validate_rules(rules: &[ProxyRule]) -> Result<(), ConfigValidationError> {
    for rule in rules {
        validate_rule_pattern(&rule.pattern)?;
    }
    Ok(())
}

pub fn validate_rule_pattern(pattern: &str) -> Result<(), ConfigValidationError> {
    if !is_valid_rule_pattern(pattern) {
        return Err(ConfigValidationError::InvalidRulePattern(pattern.to_string()));
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<(), ConfigValidationError> {
    if !SUPPORTED_SCHEMA_VERSIONS.contains(&version) {
        return Err(ConfigValidationError::IncompatibleVersion(version.to_string()));
    }
    Ok(())
}

/// Reject empty or unparsable YAML text.
pub fn validate_yaml_text(text: &str) -> Result<(), ConfigValidationError> {
    if text.trim().is_empty() {
        return Err(ConfigValidationError::InvalidYamlFormat("document is empty".into()));
    }
    serde_yaml::from_str::<serde_yaml::Value>(text)
        .map(|_| ())
        .map_err(|e| ConfigValidationError::InvalidYamlFormat(e.to_string()))
}

pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty() && (matches(&HOSTNAME_RE, host) || matches(&IPV4_RE, host))
}

pub fn is_valid_port(port: u32) -> bool {
    (1..=65535).contains(&port)
}

pub fn is_valid_rule_pattern(pattern: &str) -> bool {
    matches(&RULE_PATTERN_RE, pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ProxyConfiguration {
        ProxyConfiguration {
            server_address: "proxy.example.com:443".into(),
            username: "u".into(),
            password: "p".into(),
            local_port: 1080,
            enabled: true,
            schema_version: "1.0".into(),
        }
    }

    #[test]
    fn scenario_config_is_valid() {
        assert_eq!(validate(&valid_config(), &[]), Ok(()));
    }

    #[test]
    fn local_port_zero_rejected() {
        let mut c = valid_config();
        c.local_port = 0;
        assert_eq!(validate(&c, &[]), Err(ConfigValidationError::InvalidLocalPort));
    }

    #[test]
    fn hostnames_and_ipv4_accepted() {
        for host in ["localhost", "a.b.c", "my-proxy.example.org", "10.1.2.3", "x1"] {
            assert!(is_valid_host(host), "{host}");
        }
    }

    #[test]
    fn bad_hosts_rejected() {
        for host in ["", "-bad.com", "bad-.com", "under_score.com", "a..b", "sp ace", "https://x"] {
            assert!(!is_valid_host(host), "{host}");
        }
    }

    #[test]
    fn server_port_range() {
        assert_eq!(validate_server_address("h:1"), Ok(()));
        assert_eq!(validate_server_address("h:65535"), Ok(()));
        assert_eq!(
            validate_server_address("h:0"),
            Err(ConfigValidationError::InvalidServerPort)
        );
        assert_eq!(
            validate_server_address("h:65536"),
            Err(ConfigValidationError::InvalidServerPort)
        );
        assert_eq!(
            validate_server_address("h:http"),
            Err(ConfigValidationError::InvalidServerPort)
        );
    }

    #[test]
    fn empty_credentials_rejected() {
        let mut c = valid_config();
        c.password.clear();
        assert_eq!(validate(&c, &[]), Err(ConfigValidationError::EmptyCredentials));
    }

    #[test]
    fn fail_fast_reports_address_first() {
        let c = ProxyConfiguration {
            server_address: "bad host".into(),
            local_port: 0,
            ..valid_config()
        };
        assert_eq!(validate(&c, &[]), Err(ConfigValidationError::InvalidServerAddress));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut c = valid_config();
        c.schema_version = "2.0".into();
        assert_eq!(
            validate(&c, &[]),
            Err(ConfigValidationError::IncompatibleVersion("2.0".into()))
        );
    }

    #[test]
    fn rule_patterns() {
        assert!(is_valid_rule_pattern("*.example.com"));
        assert!(is_valid_rule_pattern("ab?-cd_1"));
        assert!(!is_valid_rule_pattern(""));
        assert!(!is_valid_rule_pattern("a/b"));
        assert!(!is_valid_rule_pattern("a b"));

        let rules = vec![
            ProxyRule::new("ok.com", RuleAction::Proxy),
            ProxyRule::new("bad rule", RuleAction::Direct),
        ];
        assert_eq!(
            validate(&valid_config(), &rules),
            Err(ConfigValidationError::InvalidRulePattern("bad rule".into()))
        );
    }

    #[test]
    fn disabled_profile_may_be_incomplete() {
        let profile = ProxyProfile::default();
        assert_eq!(validate_profile(&profile), Ok(()));

        let mut enabled = ProxyProfile::default();
        enabled.configuration.enabled = true;
        assert_eq!(
            validate_profile(&enabled),
            Err(ConfigValidationError::InvalidServerAddress)
        );
    }

    #[test]
    fn yaml_text_checks() {
        assert!(matches!(
            validate_yaml_text("   \n"),
            Err(ConfigValidationError::InvalidYamlFormat(_))
        ));
        assert!(matches!(
            validate_yaml_text("services: [unclosed"),
            Err(ConfigValidationError::InvalidYamlFormat(_))
        ));
        assert_eq!(validate_yaml_text("services: []\n"), Ok(()));
    }
}
