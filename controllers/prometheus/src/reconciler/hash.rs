//! Input hash stored on every shard StatefulSet.
//!
//! Serialized through `serde_json` over `BTreeMap`-backed fields, so map
//! ordering never changes the digest.

use crate::config::OperatorConfig;
use crds::Prometheus;
use k8s_openapi::api::apps::v1::StatefulSetSpec;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    labels: Option<&'a BTreeMap<String, String>>,
    annotations: Option<&'a BTreeMap<String, String>>,
    generation: Option<i64>,
    web_http2: Option<bool>,
    config: &'a OperatorConfig,
    spec: &'a StatefulSetSpec,
    rule_config_maps: Vec<&'a str>,
    sharded_secret: &'a str,
}

/// Digest of everything that shapes a shard's StatefulSet.
///
/// `revision_history_limit` is zeroed first; the API server may default it
/// and it has no effect on the running pods.
pub fn input_hash(
    prometheus: &Prometheus,
    config: &OperatorConfig,
    spec: &StatefulSetSpec,
    rule_config_maps: &[String],
    sharded_secret_digest: &str,
) -> Result<String, serde_json::Error> {
    let mut spec = spec.clone();
    spec.revision_history_limit = None;

    let mut rule_config_maps: Vec<&str> = rule_config_maps.iter().map(String::as_str).collect();
    rule_config_maps.sort_unstable();

    let input = HashInput {
        labels: prometheus.metadata.labels.as_ref(),
        annotations: prometheus.metadata.annotations.as_ref(),
        generation: prometheus.metadata.generation,
        web_http2: prometheus.web_http2(),
        config,
        spec: &spec,
        rule_config_maps,
        sharded_secret: sharded_secret_digest,
    };

    let bytes = serde_json::to_vec(&input)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_prometheus;

    fn spec(history: i32) -> StatefulSetSpec {
        StatefulSetSpec {
            replicas: Some(2),
            revision_history_limit: Some(history),
            ..Default::default()
        }
    }

    fn hash(p: &Prometheus, spec: &StatefulSetSpec, cms: &[&str]) -> String {
        let cms: Vec<String> = cms.iter().map(|s| s.to_string()).collect();
        input_hash(p, &OperatorConfig::default(), spec, &cms, "digest").unwrap()
    }

    #[test]
    fn test_generation_changes_hash() {
        let p = create_test_prometheus("monitoring", "k8s");
        let mut bumped = p.clone();
        bumped.metadata.generation = Some(2);

        assert_ne!(hash(&p, &spec(10), &[]), hash(&bumped, &spec(10), &[]));
    }

    #[test]
    fn test_volatile_field_ignored() {
        let p = create_test_prometheus("monitoring", "k8s");
        assert_eq!(hash(&p, &spec(10), &[]), hash(&p, &spec(3), &[]));
    }

    #[test]
    fn test_rule_config_map_order_ignored() {
        let p = create_test_prometheus("monitoring", "k8s");
        assert_eq!(hash(&p, &spec(10), &["b", "a"]), hash(&p, &spec(10), &["a", "b"]));
        assert_ne!(hash(&p, &spec(10), &["a"]), hash(&p, &spec(10), &["a", "b"]));
    }

    #[test]
    fn test_config_and_secret_digest_included() {
        let p = create_test_prometheus("monitoring", "k8s");
        let base = input_hash(&p, &OperatorConfig::default(), &spec(10), &[], "one").unwrap();

        let other_digest = input_hash(&p, &OperatorConfig::default(), &spec(10), &[], "two").unwrap();
        assert_ne!(base, other_digest);

        let config = OperatorConfig {
            prometheus_default_version: "v2.0.0".to_string(),
            ..Default::default()
        };
        let other_config = input_hash(&p, &config, &spec(10), &[], "one").unwrap();
        assert_ne!(base, other_config);
    }

    #[test]
    fn test_http2_flag_included() {
        let p = create_test_prometheus("monitoring", "k8s");
        let mut http2 = p.clone();
        http2.spec.web = Some(crds::PrometheusWebSpec {
            http_config: Some(crds::WebHttpConfig { http2: Some(false) }),
            ..Default::default()
        });
        assert_ne!(hash(&p, &spec(10), &[]), hash(&http2, &spec(10), &[]));
    }
}
