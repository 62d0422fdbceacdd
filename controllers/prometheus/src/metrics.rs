//! Operator metrics.
//!
//! - `prometheus_operator_selected_resources{controller,resource}`
//! - `prometheus_operator_rejected_resources{controller,resource}`
//! - `prometheus_operator_statefulset_delete_create_total`
//! - `prometheus_operator_reconcile_operations_total`
//! - `prometheus_operator_reconcile_errors_total`
//!
//! Everything lives in one [`Registry`] owned by [`Metrics`] and is rendered
//! by the `/metrics` route of [`crate::server`].

use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};

const CONTROLLER: &str = "prometheus";

pub struct Metrics {
    registry: Registry,
    selected_resources: IntGaugeVec,
    rejected_resources: IntGaugeVec,
    stateful_set_delete_create: IntCounter,
    reconcile_operations: IntCounter,
    reconcile_errors: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let selected_resources = IntGaugeVec::new(
            Opts::new(
                "prometheus_operator_selected_resources",
                "Number of resources selected by the controller",
            ),
            &["controller", "resource"],
        )?;
        let rejected_resources = IntGaugeVec::new(
            Opts::new(
                "prometheus_operator_rejected_resources",
                "Number of resources rejected by the controller",
            ),
            &["controller", "resource"],
        )?;
        let stateful_set_delete_create = IntCounter::new(
            "prometheus_operator_statefulset_delete_create_total",
            "Number of times a StatefulSet was deleted for recreation",
        )?;
        let reconcile_operations = IntCounter::new(
            "prometheus_operator_reconcile_operations_total",
            "Total number of reconcile operations",
        )?;
        let reconcile_errors = IntCounter::new(
            "prometheus_operator_reconcile_errors_total",
            "Number of errors that occurred during reconcile operations",
        )?;

        registry.register(Box::new(selected_resources.clone()))?;
        registry.register(Box::new(rejected_resources.clone()))?;
        registry.register(Box::new(stateful_set_delete_create.clone()))?;
        registry.register(Box::new(reconcile_operations.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;

        Ok(Self {
            registry,
            selected_resources,
            rejected_resources,
            stateful_set_delete_create,
            reconcile_operations,
            reconcile_errors,
        })
    }

    /// Record the outcome of selecting one resource kind.
    pub fn set_resources(&self, resource: &str, selected: usize, rejected: usize) {
        self.selected_resources
            .with_label_values(&[CONTROLLER, resource])
            .set(i64::try_from(selected).unwrap_or(i64::MAX));
        self.rejected_resources
            .with_label_values(&[CONTROLLER, resource])
            .set(i64::try_from(rejected).unwrap_or(i64::MAX));
    }

    pub fn inc_stateful_set_delete_create(&self) {
        self.stateful_set_delete_create.inc();
    }

    pub fn inc_reconcile_operations(&self) {
        self.reconcile_operations.inc();
    }

    pub fn inc_reconcile_errors(&self) {
        self.reconcile_errors.inc();
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    #[cfg(test)]
    pub(crate) fn selected(&self, resource: &str) -> i64 {
        self.selected_resources.with_label_values(&[CONTROLLER, resource]).get()
    }

    #[cfg(test)]
    pub(crate) fn rejected(&self, resource: &str) -> i64 {
        self.rejected_resources.with_label_values(&[CONTROLLER, resource]).get()
    }

    #[cfg(test)]
    pub(crate) fn delete_create_total(&self) -> u64 {
        self.stateful_set_delete_create.get()
    }
}
