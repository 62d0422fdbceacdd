//! PrometheusRule selection and rule ConfigMap management.
//!
//! [`RuleSelector`] turns the selected PrometheusRules into rule files,
//! [`pack`] splits them into ConfigMap-sized buckets and [`RuleSyncer`]
//! writes those buckets.

mod packer;
mod syncer;

pub use packer::{PackError, RuleBucket, pack};
pub use syncer::RuleSyncer;

use crate::selector::validation::{Version, parse_duration};
use crate::selector::{Selection, SelectorError, list_matching};
use cluster_client::ClusterClientTrait;
use crds::{Prometheus, PrometheusRule, PrometheusRuleSpec};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Half of the 1 MiB object limit, leaving room for metadata.
pub const MAX_CONFIGMAP_DATA_SIZE: usize = 524_288;

const LIMIT_SINCE: Version = Version::new(2, 31, 0);
const KEEP_FIRING_FOR_SINCE: Version = Version::new(2, 42, 0);
const QUERY_OFFSET_SINCE: Version = Version::new(2, 53, 0);
const GROUP_LABELS_SINCE: Version = Version::new(3, 0, 0);

/// Selected PrometheusRules and the rule files rendered from the valid ones.
#[derive(Debug, Default)]
pub struct RuleSelection {
    pub rules: Selection<PrometheusRule>,
    /// `<namespace>-<name>-<uid>.yaml` to file content
    pub files: BTreeMap<String, String>,
}

/// Selects the PrometheusRules of one Prometheus.
pub struct RuleSelector<'a> {
    client: &'a dyn ClusterClientTrait,
    prometheus: &'a Prometheus,
    version: Version,
}

impl<'a> RuleSelector<'a> {
    pub fn new(client: &'a dyn ClusterClientTrait, prometheus: &'a Prometheus, version: Version) -> Self {
        Self {
            client,
            prometheus,
            version,
        }
    }

    pub async fn select(&self) -> Result<RuleSelection, SelectorError> {
        let spec = &self.prometheus.spec;
        let own_namespace = self.prometheus.metadata.namespace.as_deref().unwrap_or_default();
        let candidates: BTreeMap<String, PrometheusRule> = list_matching(
            self.client,
            own_namespace,
            spec.rule_selector.as_ref(),
            spec.rule_namespace_selector.as_ref(),
        )
        .await?;

        let mut selection = RuleSelection::default();
        for (key, rule) in candidates {
            let rendered = self.render(&rule);
            let result = match rendered {
                Ok(content) => {
                    selection.files.insert(rule_filename(&rule), content);
                    Ok(())
                }
                Err(e) => Err(e),
            };
            selection.rules.record("PrometheusRule", key, rule, result);
        }
        Ok(selection)
    }

    /// Render one PrometheusRule as a rule file.
    pub fn render(&self, rule: &PrometheusRule) -> Result<String, String> {
        let spec = sanitize(&rule.spec, self.version, &rule_key(rule));
        validate(&spec)?;

        let content = serde_yaml::to_string(&spec).map_err(|e| format!("failed to marshal content: {e}"))?;
        if content.len() > MAX_CONFIGMAP_DATA_SIZE {
            return Err(format!(
                "the length of rendered Prometheus Rule is {} bytes which is above the maximum limit of {MAX_CONFIGMAP_DATA_SIZE} bytes",
                content.len()
            ));
        }
        Ok(content)
    }
}

fn rule_key(rule: &PrometheusRule) -> String {
    format!(
        "{}/{}",
        rule.metadata.namespace.as_deref().unwrap_or_default(),
        rule.metadata.name.as_deref().unwrap_or_default()
    )
}

/// The uid keeps `foo-bar/x` and `foo/bar-x` apart.
pub fn rule_filename(rule: &PrometheusRule) -> String {
    format!(
        "{}-{}-{}.yaml",
        rule.metadata.namespace.as_deref().unwrap_or_default(),
        rule.metadata.name.as_deref().unwrap_or_default(),
        rule.metadata.uid.as_deref().unwrap_or_default()
    )
}

/// Drop fields the target Prometheus version does not understand, and
/// empty durations that would render as invalid values.
fn sanitize(spec: &PrometheusRuleSpec, version: Version, key: &str) -> PrometheusRuleSpec {
    let mut spec = spec.clone();
    for group in &mut spec.groups {
        if group.limit.is_some() && version < LIMIT_SINCE {
            group.limit = None;
            warn!(prometheusrule = %key, minimum_version = %LIMIT_SINCE, "Ignoring `limit` not supported by Prometheus");
        }
        if group.query_offset.is_some() && version < QUERY_OFFSET_SINCE {
            group.query_offset = None;
            warn!(prometheusrule = %key, minimum_version = %QUERY_OFFSET_SINCE, "Ignoring `query_offset` not supported by Prometheus");
        }
        if !group.labels.is_empty() && version < GROUP_LABELS_SINCE {
            group.labels.clear();
            warn!(prometheusrule = %key, minimum_version = %GROUP_LABELS_SINCE, "Ignoring group labels not supported by Prometheus");
        }
        if group.interval.as_deref() == Some("") {
            group.interval = None;
        }

        for rule in &mut group.rules {
            if rule.keep_firing_for.is_some() && version < KEEP_FIRING_FOR_SINCE {
                rule.keep_firing_for = None;
                warn!(prometheusrule = %key, minimum_version = %KEEP_FIRING_FOR_SINCE, "Ignoring `keep_firing_for` not supported by Prometheus");
            }
            if rule.for_.as_deref() == Some("") {
                rule.for_ = None;
            }
        }
    }
    spec
}

fn validate(spec: &PrometheusRuleSpec) -> Result<(), String> {
    let mut names = HashSet::new();
    for (i, group) in spec.groups.iter().enumerate() {
        if group.name.is_empty() {
            return Err(format!("groups[{i}]: group name must not be empty"));
        }
        if !names.insert(group.name.as_str()) {
            return Err(format!("groups[{i}]: {:?}: repeated in the same file", group.name));
        }
        for (field, value) in [("interval", &group.interval), ("query_offset", &group.query_offset)] {
            check_duration(value.as_deref()).map_err(|e| format!("group {:?}: {field}: {e}", group.name))?;
        }

        for (j, rule) in group.rules.iter().enumerate() {
            let at = |e: &str| format!("group {:?}, rule {j}: {e}", group.name);
            match (rule.record.as_deref(), rule.alert.as_deref()) {
                (Some(_), Some(_)) => return Err(at("only one of 'record' and 'alert' must be set")),
                (None, None) | (Some(""), None) | (None, Some("")) => {
                    return Err(at("one of 'record' or 'alert' must be set"));
                }
                _ => {}
            }
            if rule.expr.trim().is_empty() {
                return Err(at("field 'expr' must be set in rule"));
            }
            if rule.record.is_some() && (rule.for_.is_some() || !rule.annotations.is_empty()) {
                return Err(at("invalid field 'for' or 'annotations' in recording rule"));
            }
            for value in [&rule.for_, &rule.keep_firing_for] {
                check_duration(value.as_deref()).map_err(|e| at(e.as_str()))?;
            }
        }
    }
    Ok(())
}

fn check_duration(value: Option<&str>) -> Result<(), String> {
    match value {
        Some(raw) if parse_duration(raw).is_none() => Err(format!("invalid duration {raw:?}")),
        _ => Ok(()),
    }
}
