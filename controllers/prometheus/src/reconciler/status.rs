//! Prometheus status from shard StatefulSets and their pods.

use super::{Reconciler, lock};
use crate::error::ControllerError;
use crate::naming::{split_key, stateful_set_name};
use chrono::Utc;
use crds::{Condition, ConditionStatus, Prometheus, PrometheusStatus, ShardStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::core::Selector;
use tracing::debug;

pub const AVAILABLE_CONDITION: &str = "Available";
pub const RECONCILED_CONDITION: &str = "Reconciled";

const REVISION_HASH_LABEL: &str = "controller-revision-hash";

fn pod_ready(pod: &Pod) -> Result<(), String> {
    let ready = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));
    match ready {
        Some(c) if c.status == "True" => Ok(()),
        Some(c) => Err(c.message.clone().unwrap_or_else(|| "pod is not ready".to_string())),
        None => Err("pod has no Ready condition".to_string()),
    }
}

/// Keep the transition time of `previous` when the status did not move.
fn carry_over(mut condition: Condition, previous: &[Condition]) -> Condition {
    if let Some(old) = previous.iter().find(|c| c.type_ == condition.type_) {
        if old.status == condition.status && old.last_transition_time.is_some() {
            condition.last_transition_time = old.last_transition_time;
        }
    }
    condition
}

fn condition(type_: &str, status: ConditionStatus, reason: Option<&str>, message: Option<String>, generation: i64) -> Condition {
    Condition {
        type_: type_.to_string(),
        status,
        last_transition_time: Some(Utc::now()),
        reason: reason.map(str::to_string),
        message,
        observed_generation: generation,
    }
}

impl Reconciler {
    /// Recompute and write the status of the Prometheus `namespace/name`.
    pub async fn update_status(&self, key: &str) -> Result<(), ControllerError> {
        let (namespace, name) =
            split_key(key).ok_or_else(|| ControllerError::Reconciliation(format!("invalid key {key:?}")))?;
        let Some(mut prometheus) = self.client.get_prometheus(namespace, name).await? else {
            return Ok(());
        };

        let status = self.compute_status(&prometheus).await?;
        if prometheus.status.as_ref() == Some(&status) {
            debug!(key = %key, "Status unchanged");
            return Ok(());
        }

        prometheus.status = Some(status);
        self.client.update_prometheus_status(&prometheus).await?;
        Ok(())
    }

    async fn compute_status(&self, prometheus: &Prometheus) -> Result<PrometheusStatus, ControllerError> {
        let namespace = prometheus.metadata.namespace.as_deref().unwrap_or_default();
        let name = prometheus.metadata.name.as_deref().unwrap_or_default();
        let key = format!("{namespace}/{name}");
        let generation = prometheus.metadata.generation.unwrap_or_default();
        let wanted = prometheus.replicas();

        let mut status = PrometheusStatus {
            paused: prometheus.spec.paused,
            ..Default::default()
        };
        let mut messages = Vec::new();
        let mut available_status = ConditionStatus::True;
        let mut available_reason = None;

        for shard in 0..prometheus.shards() {
            let sts_name = stateful_set_name(name, shard);
            let sts = match self.client.get_stateful_set(namespace, &sts_name).await? {
                Some(sts) if sts.metadata.deletion_timestamp.is_none() => sts,
                // Not created yet or on its way out.
                _ => {
                    debug!(statefulset = %sts_name, shard, "Skipping missing or deleting StatefulSet");
                    continue;
                }
            };

            let match_labels = sts
                .spec
                .as_ref()
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default();
            let pods = self
                .client
                .list_pods(namespace, &Selector::from_iter(match_labels))
                .await?;
            let update_revision = sts.status.as_ref().and_then(|s| s.update_revision.as_deref());

            let mut shard_status = ShardStatus {
                shard_id: shard.to_string(),
                ..Default::default()
            };
            let mut pod_messages = Vec::new();
            for pod in &pods {
                shard_status.replicas += 1;
                let revision = pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(REVISION_HASH_LABEL))
                    .map(String::as_str);
                if update_revision.is_some() && revision == update_revision {
                    shard_status.updated_replicas += 1;
                }
                match pod_ready(pod) {
                    Ok(()) => shard_status.available_replicas += 1,
                    Err(message) => {
                        shard_status.unavailable_replicas += 1;
                        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
                        pod_messages.push(format!("shard {shard}: pod {pod_name}: {message}"));
                    }
                }
            }

            status.replicas += shard_status.replicas;
            status.updated_replicas += shard_status.updated_replicas;
            status.available_replicas += shard_status.available_replicas;
            status.unavailable_replicas += shard_status.unavailable_replicas;
            let ready = shard_status.available_replicas;
            status.shard_statuses.push(shard_status);

            // Also true when zero replicas are wanted.
            if ready >= wanted {
                continue;
            }

            if ready == 0 {
                available_status = ConditionStatus::False;
                available_reason = Some("NoPodReady");
            } else if available_status != ConditionStatus::False {
                available_status = ConditionStatus::Degraded;
                available_reason = Some("SomePodsNotReady");
            }
            messages.extend(pod_messages);
        }

        let message = (!messages.is_empty()).then(|| messages.join("\n"));
        let available = condition(AVAILABLE_CONDITION, available_status, available_reason, message, generation);

        let previous = prometheus
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        status.conditions.push(carry_over(available, previous));

        let outcome = lock(&self.outcomes).get(&key).cloned();
        let reconciled = match outcome {
            Some(Ok(())) => Some(condition(RECONCILED_CONDITION, ConditionStatus::True, None, None, generation)),
            Some(Err(message)) => Some(condition(
                RECONCILED_CONDITION,
                ConditionStatus::False,
                Some("ReconciliationFailed"),
                Some(message),
                generation,
            )),
            None => previous.iter().find(|c| c.type_ == RECONCILED_CONDITION).cloned(),
        };
        if let Some(reconciled) = reconciled {
            status.conditions.push(carry_over(reconciled, previous));
        }

        Ok(status)
    }
}
