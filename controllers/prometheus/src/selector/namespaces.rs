//! Namespace resolution for dependent resource selection.

use super::{SelectorError, label_selector};
use cluster_client::ClusterClientTrait;
use crds::LabelSelector;
use tracing::debug;

/// Namespaces to look for dependents in.
///
/// Without a namespace selector only `own_namespace` is searched. Otherwise
/// every namespace matching the selector is returned, sorted by name.
pub async fn select_namespaces(
    client: &dyn ClusterClientTrait,
    own_namespace: &str,
    namespace_selector: Option<&LabelSelector>,
) -> Result<Vec<String>, SelectorError> {
    let Some(namespace_selector) = namespace_selector else {
        return Ok(vec![own_namespace.to_string()]);
    };

    let selector = label_selector("namespaceSelector", namespace_selector)?;
    let mut namespaces: Vec<String> = client
        .list_namespaces(&selector)
        .await
        .map_err(|source| SelectorError::List {
            kind: "Namespace".to_string(),
            namespace: String::new(),
            source,
        })?
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .collect();
    namespaces.sort();
    namespaces.dedup();

    debug!(namespaces = %namespaces.join(","), "Selected namespaces");
    Ok(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_no_selector_means_own_namespace() {
        let (mock, client) = mock_client();
        mock.add_namespace(create_test_namespace("other", &[("team", "obs")]));

        let namespaces = select_namespaces(client.as_ref(), "monitoring", None).await.unwrap();
        assert_eq!(namespaces, vec!["monitoring"]);
    }

    #[tokio::test]
    async fn test_selector_matches_labels() {
        let (mock, client) = mock_client();
        mock.add_namespace(create_test_namespace("b", &[("team", "obs")]));
        mock.add_namespace(create_test_namespace("a", &[("team", "obs")]));
        mock.add_namespace(create_test_namespace("c", &[("team", "web")]));

        let sel = LabelSelector::from_labels([("team", "obs")]);
        let namespaces = select_namespaces(client.as_ref(), "monitoring", Some(&sel)).await.unwrap();
        assert_eq!(namespaces, vec!["a", "b"]);

        let all = select_namespaces(client.as_ref(), "monitoring", Some(&LabelSelector::default()))
            .await
            .unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);
    }
}
