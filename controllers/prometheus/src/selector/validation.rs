//! Per-object validation rules applied during selection.
//!
//! Every check returns a human readable message; the selector attaches the
//! object key and counts the rejection.

use crds::{Endpoint, RelabelConfig};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// Scrape interval assumed when neither the endpoint nor the Prometheus sets one.
pub const DEFAULT_SCRAPE_INTERVAL: &str = "30s";

/// `major.minor.patch` of a Prometheus release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Tolerant parse: accepts a leading `v`, missing components and a
    /// pre-release or build suffix (`v2.53`, `3.0.0-rc.1`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let core = raw.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

const CASE_ACTIONS_SINCE: Version = Version::new(2, 36, 0);
const EQUAL_ACTIONS_SINCE: Version = Version::new(2, 41, 0);

static RELABEL_TARGET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:(?:[a-zA-Z_]|\$(?:\{\w+\}|\w+))+\w*)+$").ok());
static LABEL_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").ok());
static HOSTNAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9_]{1}[a-zA-Z0-9_-]{0,62})(\.[a-zA-Z0-9_]{1}[a-zA-Z0-9_-]{0,62})*[\._]?$").ok()
});

fn matches(re: &LazyLock<Option<Regex>>, value: &str) -> bool {
    (**re).as_ref().is_some_and(|re| re.is_match(value))
}

/// True for a valid Prometheus label name.
pub fn is_valid_label_name(name: &str) -> bool {
    matches(&LABEL_NAME, name)
}

const DEFAULT_SEPARATOR: &str = ";";
const DEFAULT_REGEX: &str = "(.*)";
const DEFAULT_REPLACEMENT: &str = "$1";

/// Validate a list of relabel configs against the Prometheus version.
pub fn validate_relabel_configs(configs: &[RelabelConfig], version: Version) -> Result<(), String> {
    configs
        .iter()
        .enumerate()
        .try_for_each(|(i, rc)| validate_relabel_config(rc, version).map_err(|e| format!("[{i}]: {e}")))
}

fn validate_relabel_config(rc: &RelabelConfig, version: Version) -> Result<(), String> {
    let raw_action = rc.action.as_deref().filter(|a| !a.is_empty()).unwrap_or("replace");
    let action = raw_action.to_ascii_lowercase();
    let target = rc.target_label.as_deref().unwrap_or_default();
    let replacement_set = rc.replacement.as_deref().is_some_and(|r| r != DEFAULT_REPLACEMENT);
    let separator_set = rc.separator.as_deref().is_some_and(|s| s != DEFAULT_SEPARATOR);
    let regex_set = rc.regex.as_deref().is_some_and(|r| !r.is_empty() && r != DEFAULT_REGEX);
    let modulus_set = rc.modulus.is_some_and(|m| m != 0);

    match action.as_str() {
        "replace" | "keep" | "drop" | "hashmod" | "labelmap" | "labeldrop" | "labelkeep" => {}
        "lowercase" | "uppercase" if version < CASE_ACTIONS_SINCE => {
            return Err(format!(
                "{raw_action} relabel action is only supported from Prometheus version {CASE_ACTIONS_SINCE}"
            ));
        }
        "keepequal" | "dropequal" if version < EQUAL_ACTIONS_SINCE => {
            return Err(format!(
                "{raw_action} relabel action is only supported from Prometheus version {EQUAL_ACTIONS_SINCE}"
            ));
        }
        "lowercase" | "uppercase" | "keepequal" | "dropequal" => {}
        _ => return Err(format!("unknown relabel action {raw_action:?}")),
    }

    if let Some(re) = rc.regex.as_deref() {
        Regex::new(&format!("^(?:{re})$"))
            .map_err(|e| format!("invalid regex {re} for relabel configuration: {e}"))?;
    }

    if action == "hashmod" && !modulus_set {
        return Err("relabel configuration for hashmod requires non-zero modulus".to_string());
    }

    let needs_target = matches!(
        action.as_str(),
        "replace" | "hashmod" | "lowercase" | "uppercase" | "keepequal" | "dropequal"
    );
    if needs_target && target.is_empty() {
        return Err(format!("relabel configuration for {raw_action} action needs targetLabel value"));
    }
    if needs_target && action != "hashmod" && !matches(&RELABEL_TARGET, target) {
        return Err(format!("{target:?} is invalid 'target_label' for {raw_action} action"));
    }
    if action == "hashmod" && !is_valid_label_name(target) {
        return Err(format!("{target:?} is invalid 'target_label' for {raw_action} action"));
    }

    if matches!(action.as_str(), "lowercase" | "uppercase" | "keepequal" | "dropequal") && replacement_set {
        return Err(format!("'replacement' can not be set for {raw_action} action"));
    }

    if action == "labelmap" {
        if let Some(replacement) = rc.replacement.as_deref() {
            if !matches(&RELABEL_TARGET, replacement) {
                return Err(format!("{replacement:?} is invalid 'replacement' for {raw_action} action"));
            }
        }
    }

    if matches!(action.as_str(), "keepequal" | "dropequal") && (regex_set || modulus_set || separator_set) {
        return Err(format!(
            "{raw_action} action requires only 'source_labels' and `target_label`, and no other fields"
        ));
    }

    if matches!(action.as_str(), "labeldrop" | "labelkeep")
        && (!rc.source_labels.is_empty() || !target.is_empty() || modulus_set || separator_set || replacement_set)
    {
        return Err(format!("{raw_action} action requires only 'regex', and no other fields"));
    }

    Ok(())
}

/// Parse a Prometheus duration such as `30s`, `1h30m` or `500ms`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    if raw.is_empty() {
        return None;
    }
    if raw == "0" {
        return Some(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let millis_per_unit: u64 = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            "y" => 31_536_000_000,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(Duration::from_millis(value.checked_mul(millis_per_unit)?))?;
    }
    Some(total)
}

/// The scrape timeout must not exceed the scrape interval.
///
/// An empty interval falls back to `default_interval`, then to 30s.
pub fn validate_scrape_timeout(
    interval: Option<&str>,
    timeout: Option<&str>,
    default_interval: Option<&str>,
) -> Result<(), String> {
    let Some(timeout) = timeout.filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let interval = interval
        .filter(|i| !i.is_empty())
        .or(default_interval.filter(|i| !i.is_empty()))
        .unwrap_or(DEFAULT_SCRAPE_INTERVAL);

    let si = parse_duration(interval).ok_or_else(|| format!("invalid scrapeInterval {interval:?}"))?;
    let st = parse_duration(timeout).ok_or_else(|| format!("invalid scrapeTimeout: {timeout:?}"))?;
    if st > si {
        return Err(format!("scrapeTimeout {timeout:?} greater than scrapeInterval {interval:?}"));
    }
    Ok(())
}

/// Endpoints must not read files from the Prometheus container.
pub fn check_arbitrary_fs_access(endpoint: &Endpoint) -> Result<(), String> {
    if endpoint.bearer_token_file.as_deref().is_some_and(|f| !f.is_empty()) {
        return Err(
            "it accesses file system via bearer token file which arbitraryFSAccessThroughSMs prohibits".to_string(),
        );
    }
    if let Some(tls) = &endpoint.tls_config {
        if tls.uses_files() {
            return Err("it accesses file system via tls config which arbitraryFSAccessThroughSMs prohibits".to_string());
        }
    }
    Ok(())
}

/// Prober URLs are `host` or `host:port`, without a scheme.
pub fn validate_prober_url(url: &str) -> Result<(), String> {
    let mut parts = url.split(':');
    let host = parts.next().unwrap_or_default();
    if host.parse::<std::net::IpAddr>().is_err() && !matches(&HOSTNAME, host) {
        return Err(format!("invalid host: {host:?}"));
    }
    if let Some(port) = parts.next() {
        if !port.parse::<u16>().is_ok_and(|p| p > 0) {
            return Err(format!("invalid port: {port:?}"));
        }
    }
    if parts.next().is_some() {
        return Err(format!("invalid prober url: {url:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc(action: &str, target: Option<&str>) -> RelabelConfig {
        RelabelConfig {
            action: Some(action.to_string()),
            target_label: target.map(str::to_string),
            ..Default::default()
        }
    }

    const V2_30: Version = Version::new(2, 30, 0);
    const V3: Version = Version::new(3, 1, 0);

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("v3.1.0"), Some(Version::new(3, 1, 0)));
        assert_eq!(Version::parse("2.53"), Some(Version::new(2, 53, 0)));
        assert_eq!(Version::parse("v3.0.0-rc.1"), Some(Version::new(3, 0, 0)));
        assert_eq!(Version::parse("latest"), None);
        assert_eq!(Version::parse("1.2.3.4"), None);
        assert!(Version::new(2, 36, 0) > Version::new(2, 9, 9));
    }

    #[test]
    fn test_relabel_actions() {
        assert!(validate_relabel_configs(&[rc("replace", Some("team"))], V3).is_ok());
        assert!(validate_relabel_configs(&[rc("Keep", None)], V3).is_ok());
        assert!(validate_relabel_configs(&[RelabelConfig::default()], V3).is_err(), "replace needs a target");

        let err = validate_relabel_configs(&[rc("explode", None)], V3).unwrap_err();
        assert!(err.starts_with("[0]: unknown relabel action"), "{err}");
    }

    #[test]
    fn test_relabel_version_gates() {
        let lower = rc("lowercase", Some("team"));
        assert!(validate_relabel_configs(std::slice::from_ref(&lower), V3).is_ok());
        assert!(validate_relabel_configs(&[lower], V2_30).is_err());
        assert!(validate_relabel_configs(&[rc("keepequal", Some("team"))], V2_30).is_err());
        assert!(validate_relabel_configs(&[rc("keepequal", Some("team"))], V3).is_ok());
    }

    #[test]
    fn test_relabel_invalid_targets() {
        assert!(validate_relabel_configs(&[rc("replace", Some("1abc"))], V3).is_err());
        assert!(validate_relabel_configs(&[rc("replace", Some("${1}_suffix"))], V3).is_ok());

        let labelmap = RelabelConfig {
            action: Some("labelmap".to_string()),
            replacement: Some("not a label".to_string()),
            ..Default::default()
        };
        assert!(validate_relabel_configs(&[labelmap], V3).is_err());
    }

    #[test]
    fn test_relabel_hashmod() {
        assert!(validate_relabel_configs(&[rc("hashmod", Some("shard"))], V3).is_err());
        let hashmod = RelabelConfig {
            modulus: Some(4),
            ..rc("hashmod", Some("shard"))
        };
        assert!(validate_relabel_configs(&[hashmod], V3).is_ok());
    }

    #[test]
    fn test_relabel_labeldrop_fields() {
        let ok = RelabelConfig {
            regex: Some("tmp_.*".to_string()),
            ..rc("labeldrop", None)
        };
        assert!(validate_relabel_configs(&[ok], V3).is_ok());
        assert!(validate_relabel_configs(&[rc("labeldrop", Some("x"))], V3).is_err());
    }

    #[test]
    fn test_relabel_bad_regex() {
        let bad = RelabelConfig {
            regex: Some("(unclosed".to_string()),
            ..rc("keep", None)
        };
        assert!(validate_relabel_configs(&[bad], V3).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("1.5s"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_scrape_timeout() {
        assert!(validate_scrape_timeout(Some("30s"), Some("10s"), None).is_ok());
        assert!(validate_scrape_timeout(Some("10s"), Some("30s"), None).is_err());
        assert!(validate_scrape_timeout(None, Some("1m"), Some("2m")).is_ok());
        // falls back to 30s
        assert!(validate_scrape_timeout(None, Some("45s"), None).is_err());
        assert!(validate_scrape_timeout(Some("10s"), None, None).is_ok());
        assert!(validate_scrape_timeout(Some("10s"), Some("soon"), None).is_err());
    }

    #[test]
    fn test_arbitrary_fs_access() {
        let clean = Endpoint::default();
        assert!(check_arbitrary_fs_access(&clean).is_ok());

        let token_file = Endpoint {
            bearer_token_file: Some("/var/run/token".to_string()),
            ..Default::default()
        };
        assert!(check_arbitrary_fs_access(&token_file).is_err());

        let tls_file = Endpoint {
            tls_config: Some(crds::TlsConfig {
                ca_file: Some("/etc/ca.crt".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(check_arbitrary_fs_access(&tls_file).is_err());
    }

    #[test]
    fn test_prober_url() {
        assert!(validate_prober_url("blackbox-exporter:9115").is_ok());
        assert!(validate_prober_url("blackbox.monitoring.svc").is_ok());
        assert!(validate_prober_url("10.0.0.1:9115").is_ok());
        assert!(validate_prober_url("http://blackbox:9115").is_err());
        assert!(validate_prober_url("blackbox:http").is_err());
        assert!(validate_prober_url("").is_err());
    }
}
