//! Rouse resource resolver: symbolic descriptor -> watchable handle.

#![forbid(unsafe_code)]

use rouse_core::{Error, ResourceDescriptor, ResourceHandle, Result};
use rouse_api::ResourceDirectory;
use tracing::debug;

/// Resolve a descriptor into a concrete, watchable handle.
///
/// A fully specified descriptor (version + plural name; the group may be
/// empty for the core group) is used as-is. Otherwise the directory is
/// queried for the kinds served under the descriptor's group/version and
/// searched by plural name first, kind second. Group and version on a
/// directory match are authoritative over the caller's input.
pub async fn resolve(
    directory: &dyn ResourceDirectory,
    desc: &ResourceDescriptor,
) -> Result<ResourceHandle> {
    if desc.is_fully_specified() {
        return Ok(ResourceHandle {
            group: desc.group.clone(),
            version: desc.version.clone(),
            kind: desc.kind.clone(),
            plural: desc.plural.clone(),
        });
    }

    let entries = directory
        .list_resource_kinds(&desc.group, &desc.version)
        .await?;
    debug!(
        group = %desc.group,
        version = %desc.version,
        served = entries.len(),
        "searching discovery response"
    );

    let mut found = None;
    if !desc.plural.is_empty() {
        found = entries.iter().find(|e| e.name == desc.plural);
    }
    if found.is_none() && !desc.kind.is_empty() {
        found = entries.iter().find(|e| e.kind == desc.kind);
    }

    let entry = found.ok_or_else(|| {
        Error::NotFound(format!(
            "resource not served: group={:?} version={:?} kind={:?} plural={:?}",
            desc.group, desc.version, desc.kind, desc.plural
        ))
    })?;

    Ok(ResourceHandle {
        group: entry.group.clone(),
        version: entry.version.clone(),
        kind: if entry.kind.is_empty() { desc.kind.clone() } else { entry.kind.clone() },
        plural: entry.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rouse_api::{ApiResourceEntry, MockDirectory};

    fn entry(group: &str, version: &str, kind: &str, name: &str) -> ApiResourceEntry {
        ApiResourceEntry {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    fn directory() -> MockDirectory {
        MockDirectory::with_entries(vec![
            entry("", "v1", "ConfigMap", "configmaps"),
            entry("", "v1", "Pod", "pods"),
            entry("apps", "v1", "Deployment", "deployments"),
        ])
    }

    #[tokio::test]
    async fn fully_specified_descriptor_skips_discovery() {
        let dir = MockDirectory::failing();
        let desc = ResourceDescriptor {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            plural: "deployments".into(),
        };
        let handle = resolve(&dir, &desc).await.expect("direct");
        assert_eq!(handle.gvk_key(), "apps/v1/Deployment");
        assert_eq!(handle.plural, "deployments");
    }

    #[tokio::test]
    async fn resolves_by_plural_name() {
        let desc = ResourceDescriptor {
            group: String::new(),
            version: String::new(),
            kind: String::new(),
            plural: "configmaps".into(),
        };
        let handle = resolve(&directory(), &desc).await.expect("found");
        assert_eq!(handle.kind, "ConfigMap");
        assert_eq!(handle.version, "v1");
    }

    #[tokio::test]
    async fn falls_back_to_kind_search() {
        let desc = ResourceDescriptor {
            group: "apps".into(),
            version: String::new(),
            kind: "Deployment".into(),
            plural: String::new(),
        };
        let handle = resolve(&directory(), &desc).await.expect("found");
        assert_eq!(handle.plural, "deployments");
    }

    #[tokio::test]
    async fn directory_group_version_are_authoritative() {
        // Caller left version blank; the match supplies it.
        let desc = ResourceDescriptor {
            group: String::new(),
            version: String::new(),
            kind: "Pod".into(),
            plural: String::new(),
        };
        let handle = resolve(&directory(), &desc).await.expect("found");
        assert_eq!(handle.version, "v1");
        assert_eq!(handle.group, "");
    }

    #[tokio::test]
    async fn unknown_descriptor_is_not_found() {
        let desc = ResourceDescriptor {
            group: String::new(),
            version: String::new(),
            kind: "Gone".into(),
            plural: String::new(),
        };
        assert!(matches!(
            resolve(&directory(), &desc).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_directory_is_a_discovery_error() {
        let desc = ResourceDescriptor {
            group: String::new(),
            version: String::new(),
            kind: "Pod".into(),
            plural: String::new(),
        };
        assert!(matches!(
            resolve(&MockDirectory::failing(), &desc).await,
            Err(Error::Discovery(_))
        ));
    }
}
