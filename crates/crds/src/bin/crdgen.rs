//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every monitoring resource as a
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > deploy/crds.yaml
//! ```

use crds::{PodMonitor, Probe, Prometheus, PrometheusRule, ScrapeConfig, ServiceMonitor};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Prometheus::crd(),
        ServiceMonitor::crd(),
        PodMonitor::crd(),
        Probe::crd(),
        PrometheusRule::crd(),
        ScrapeConfig::crd(),
    ];

    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
