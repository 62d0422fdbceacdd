//! Object names and labels shared by everything the operator manages.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Prefix of every generated object name.
pub const PREFIX: &str = "prometheus";

/// Headless service governing all shard StatefulSets of a namespace.
pub const GOVERNING_SERVICE_NAME: &str = "prometheus-operated";

/// Port name of the Prometheus web server.
pub const WEB_PORT_NAME: &str = "web";

/// Port of the Prometheus web server.
pub const WEB_PORT: i32 = 9090;

pub const SHARD_LABEL: &str = "operator.prometheus.io/shard";
pub const NAME_LABEL: &str = "operator.prometheus.io/name";
pub const MODE_LABEL: &str = "operator.prometheus.io/mode";
pub const MODE_SERVER: &str = "server";

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "prometheus-operator";

/// Label carried by rule ConfigMaps, value is the Prometheus name.
pub const RULE_CONFIG_MAP_LABEL: &str = "prometheus-name";

/// Annotation holding the input hash of a StatefulSet.
pub const INPUT_HASH_ANNOTATION: &str = "prometheus-operator-input-hash";

/// Pod template annotation set by `kubectl rollout restart`.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Key of the compressed configuration inside the config Secret.
pub const CONFIG_FILENAME: &str = "prometheus.yaml.gz";

/// `prometheus-<name>`
pub fn prefixed_name(name: &str) -> String {
    format!("{PREFIX}-{name}")
}

/// StatefulSet name of a shard: `prometheus-<name>` for shard 0 and
/// `prometheus-<name>-shard-<n>` otherwise.
pub fn stateful_set_name(name: &str, shard: i32) -> String {
    if shard == 0 {
        prefixed_name(name)
    } else {
        format!("{PREFIX}-{name}-shard-{shard}")
    }
}

/// Names of every expected shard StatefulSet, in shard order.
pub fn expected_stateful_set_names(name: &str, shards: i32) -> Vec<String> {
    (0..shards.max(1)).map(|shard| stateful_set_name(name, shard)).collect()
}

/// Secret holding the generated configuration.
pub fn config_secret_name(name: &str) -> String {
    prefixed_name(name)
}

/// Template name of the sharded TLS assets Secrets.
pub fn tls_assets_secret_name(name: &str) -> String {
    format!("{PREFIX}-{name}-tls-assets")
}

/// ConfigMap holding rule bucket `index`.
pub fn rule_config_map_name(name: &str, index: usize) -> String {
    format!("{PREFIX}-{name}-rulefiles-{index}")
}

/// Labels selecting every StatefulSet of one Prometheus.
pub fn managed_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), name.to_string()),
        (MODE_LABEL.to_string(), MODE_SERVER.to_string()),
    ])
}

/// Labels of one shard StatefulSet and its pods.
pub fn shard_labels(name: &str, shard: i32) -> BTreeMap<String, String> {
    let mut labels = managed_labels(name);
    labels.insert(SHARD_LABEL.to_string(), shard.to_string());
    labels.insert(APP_NAME_LABEL.to_string(), PREFIX.to_string());
    labels.insert(APP_INSTANCE_LABEL.to_string(), name.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(PREFIX.to_string(), name.to_string());
    labels
}

static SHARD_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+)/prometheus-(.+)-shard-[1-9][0-9]*$").ok());
static PRIMARY_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(.+)/prometheus-(.+)$").ok());

/// Map a StatefulSet key `ns/<sts-name>` to the owning Prometheus key `ns/<name>`.
///
/// The shard pattern is tried first so `prometheus-k8s-shard-2` resolves to
/// `k8s` rather than `k8s-shard-2`.
pub fn owner_key(stateful_set_key: &str) -> Option<String> {
    [&SHARD_KEY, &PRIMARY_KEY]
        .into_iter()
        .filter_map(|re| (**re).as_ref())
        .find_map(|re| re.captures(stateful_set_key))
        .map(|caps| format!("{}/{}", &caps[1], &caps[2]))
}

/// Split `ns/name`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}
