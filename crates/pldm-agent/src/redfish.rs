//! Redfish resource state propagation
//!
//! A resource is located by `Id` in both the Chassis and AutomationNodes
//! collections, then its `Status.State` and that of its sub-resources is
//! rewritten. Referenced child collections can be shared between resources,
//! so only members at or under the located resource's path are touched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use pldm_core::KnownEndpoint;
use pldm_discovery::ResourceStateSink;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Top-level collections searched for a resource id
pub const COLLECTIONS: [&str; 2] = ["/redfish/v1/Chassis", "/redfish/v1/AutomationNodes"];

/// Child relations walked below a located resource, in order
const CHILD_RELATIONS: [&str; 5] = [
    "Sensors",
    "Controls",
    "Assemblies",
    "AutomationInstrumentation",
    "Instrumentation",
];

/// Availability written to `Status.State`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Enabled,
    UnavailableOffline,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Enabled => "Enabled",
            ResourceState::UnavailableOffline => "UnavailableOffline",
        }
    }
}

/// Read and patch access to a resource tree
#[async_trait]
pub trait ResourceTree: Send + Sync {
    /// Fetch a resource. `None` for any non-success status.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Patch a resource and return the HTTP status code.
    async fn patch(&self, path: &str, body: &Value) -> Result<u16>;
}

/// Resource tree served over HTTP
pub struct HttpResourceTree {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceTree {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ResourceTree for HttpResourceTree {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            debug!(path, status = %response.status(), "Resource not accessible");
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<u16> {
        let response = self.client.patch(self.url(path)).json(body).send().await?;
        let status = response.status().as_u16();
        if !matches!(status, 200 | 204) {
            let text = response.text().await.unwrap_or_default();
            warn!(path, status, response = %text.chars().take(200).collect::<String>(), "PATCH rejected");
        }
        Ok(status)
    }
}

fn has_state(resource: &Value) -> bool {
    resource
        .get("Status")
        .and_then(|s| s.get("State"))
        .is_some()
}

fn odata_id(value: &Value) -> Option<&str> {
    value.get("@odata.id").and_then(Value::as_str)
}

fn members(collection: &Value) -> impl Iterator<Item = &Value> {
    collection
        .get("Members")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Whether `path` is `root` or nested below it
fn under_root(path: &str, root: &str) -> bool {
    let prefix = root.trim_end_matches('/');
    path == root || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// Walks and rewrites resource availability
pub struct Propagator<T> {
    tree: T,
}

impl<T: ResourceTree> Propagator<T> {
    pub fn new(tree: T) -> Self {
        Self { tree }
    }

    /// Member path in `collection` whose `Id` equals `resource_id`
    pub async fn find(&self, collection: &str, resource_id: &str) -> Option<String> {
        let listing = match self.tree.get(collection).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return None,
            Err(e) => {
                warn!(collection, error = %e, "Failed to fetch collection");
                return None;
            }
        };

        for member in members(&listing) {
            let Some(path) = odata_id(member) else {
                continue;
            };
            match self.tree.get(path).await {
                Ok(Some(resource)) if resource.get("Id").and_then(Value::as_str) == Some(resource_id) => {
                    debug!(collection, path, resource_id, "Found resource");
                    return Some(path.to_string());
                }
                Ok(_) => {}
                Err(e) => debug!(path, error = %e, "Error checking member"),
            }
        }

        debug!(collection, resource_id, "Resource not in collection");
        None
    }

    /// Set `state` on every resource with `resource_id` and its sub-resources.
    /// Returns the number of successful writes.
    pub async fn set_state(&self, resource_id: &str, state: ResourceState) -> usize {
        let mut roots = Vec::new();
        for collection in COLLECTIONS {
            if let Some(path) = self.find(collection, resource_id).await {
                roots.push(path);
            }
        }

        if roots.is_empty() {
            warn!(resource_id, "Could not find resource in any collection");
            return 0;
        }

        let mut writes = 0;
        for root in roots {
            match self.tree.get(&root).await {
                Ok(Some(resource)) => {
                    info!(path = %root, state = state.as_str(), "Updating resource subtree");
                    writes += self.walk(resource, root, state).await;
                }
                Ok(None) => warn!(path = %root, "Failed to fetch resource"),
                Err(e) => warn!(path = %root, error = %e, "Failed to fetch resource"),
            }
        }

        info!(resource_id, state = state.as_str(), writes, "Resource state updated");
        writes
    }

    async fn write_state(&self, path: &str, state: ResourceState) -> bool {
        let body = json!({ "Status": { "State": state.as_str() } });
        match self.tree.patch(path, &body).await {
            Ok(200 | 204) => {
                debug!(path, state = state.as_str(), "Patched state");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(path, error = %e, "PATCH failed");
                false
            }
        }
    }

    fn walk(&self, resource: Value, root: String, state: ResourceState) -> BoxFuture<'_, usize> {
        async move {
            let mut writes = 0;
            if has_state(&resource) && self.write_state(&root, state).await {
                writes += 1;
            }

            for relation in CHILD_RELATIONS {
                let Some(child) = resource.get(relation) else {
                    continue;
                };

                if let Some(path) = odata_id(child) {
                    if matches!(relation, "AutomationInstrumentation" | "Instrumentation") {
                        // Instrumentation is walked as a resource of the same root
                        if let Ok(Some(instrumentation)) = self.tree.get(path).await {
                            writes += self.walk(instrumentation, root.clone(), state).await;
                        }
                    } else {
                        writes += self.walk_collection(path, &root, state).await;
                    }
                } else {
                    for member in members(child) {
                        if let Some(path) = odata_id(member) {
                            writes += self.walk(member.clone(), path.to_string(), state).await;
                        }
                    }
                }
            }
            writes
        }
        .boxed()
    }

    async fn walk_collection(&self, collection: &str, root: &str, state: ResourceState) -> usize {
        let listing = match self.tree.get(collection).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return 0,
            Err(e) => {
                debug!(collection, error = %e, "Could not fetch collection");
                return 0;
            }
        };

        let mut writes = 0;
        for member in members(&listing) {
            let Some(path) = odata_id(member) else {
                continue;
            };
            if !under_root(path, root) {
                debug!(path, root, "Skipping unrelated member");
                continue;
            }
            if let Ok(Some(resource)) = self.tree.get(path).await {
                if has_state(&resource) && self.write_state(path, state).await {
                    writes += 1;
                }
            }
        }
        writes
    }
}

#[async_trait]
impl<T: ResourceTree> ResourceStateSink for Propagator<T> {
    async fn enable(&self, endpoint: &KnownEndpoint) -> Result<()> {
        self.set_state(&endpoint.resource_id, ResourceState::Enabled).await;
        Ok(())
    }

    async fn disable(&self, endpoint: &KnownEndpoint) -> Result<()> {
        self.set_state(&endpoint.resource_id, ResourceState::UnavailableOffline)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory tree applying patches to its own documents
    #[derive(Default)]
    struct MemoryTree {
        docs: Mutex<HashMap<String, Value>>,
        patches: Mutex<Vec<String>>,
    }

    impl MemoryTree {
        fn insert(&self, path: &str, doc: Value) {
            self.docs.lock().unwrap().insert(path.to_string(), doc);
        }

        fn state(&self, path: &str) -> Option<String> {
            self.docs.lock().unwrap()[path]["Status"]["State"]
                .as_str()
                .map(str::to_string)
        }
    }

    #[async_trait]
    impl ResourceTree for MemoryTree {
        async fn get(&self, path: &str) -> Result<Option<Value>> {
            Ok(self.docs.lock().unwrap().get(path).cloned())
        }

        async fn patch(&self, path: &str, body: &Value) -> Result<u16> {
            let mut docs = self.docs.lock().unwrap();
            let Some(doc) = docs.get_mut(path) else {
                return Ok(404);
            };
            doc["Status"] = body["Status"].clone();
            self.patches.lock().unwrap().push(path.to_string());
            Ok(204)
        }
    }

    fn member(path: &str) -> Value {
        json!({ "@odata.id": path })
    }

    fn fixture() -> MemoryTree {
        let tree = MemoryTree::default();
        let enabled = json!({ "State": "Enabled" });

        tree.insert(
            "/redfish/v1/Chassis",
            json!({ "Members": [member("/redfish/v1/Chassis/A"), member("/redfish/v1/Chassis/B")] }),
        );
        tree.insert(
            "/redfish/v1/Chassis/A",
            json!({
                "Id": "A",
                "Status": enabled,
                "Sensors": member("/redfish/v1/Chassis/Sensors"),
                "Controls": { "Members": [
                    { "@odata.id": "/redfish/v1/Chassis/A/Controls/Fan", "Status": enabled }
                ]},
                "AutomationInstrumentation": member("/redfish/v1/Chassis/A/Instrumentation"),
            }),
        );
        tree.insert("/redfish/v1/Chassis/B", json!({ "Id": "B", "Status": enabled }));
        tree.insert("/redfish/v1/Chassis/A/Controls/Fan", json!({ "Status": enabled }));
        tree.insert(
            "/redfish/v1/Chassis/A/Instrumentation",
            json!({ "Controls": member("/redfish/v1/Chassis/A/Instrumentation/Controls") }),
        );
        tree.insert(
            "/redfish/v1/Chassis/A/Instrumentation/Controls",
            json!({ "Members": [member("/redfish/v1/Chassis/A/Instrumentation/Controls/Pump")] }),
        );
        tree.insert(
            "/redfish/v1/Chassis/A/Instrumentation/Controls/Pump",
            json!({ "Status": enabled }),
        );

        // Shared collection holding sensors of both A and B
        tree.insert(
            "/redfish/v1/Chassis/Sensors",
            json!({ "Members": [
                member("/redfish/v1/Chassis/A/Sensors/Temp"),
                member("/redfish/v1/Chassis/B/Sensors/Temp"),
                member("/redfish/v1/Chassis/AB/Sensors/Temp"),
            ]}),
        );
        tree.insert("/redfish/v1/Chassis/A/Sensors/Temp", json!({ "Status": enabled }));
        tree.insert("/redfish/v1/Chassis/B/Sensors/Temp", json!({ "Status": enabled }));
        tree.insert("/redfish/v1/Chassis/AB/Sensors/Temp", json!({ "Status": enabled }));

        tree.insert(
            "/redfish/v1/AutomationNodes",
            json!({ "Members": [member("/redfish/v1/AutomationNodes/A")] }),
        );
        tree.insert(
            "/redfish/v1/AutomationNodes/A",
            json!({ "Id": "A", "Status": enabled }),
        );
        tree
    }

    #[test]
    fn test_under_root() {
        assert!(under_root("/redfish/v1/Chassis/A", "/redfish/v1/Chassis/A"));
        assert!(under_root("/redfish/v1/Chassis/A/Sensors/T", "/redfish/v1/Chassis/A"));
        assert!(under_root("/redfish/v1/Chassis/A/Sensors/T", "/redfish/v1/Chassis/A/"));
        assert!(!under_root("/redfish/v1/Chassis/AB/Sensors/T", "/redfish/v1/Chassis/A"));
    }

    #[tokio::test]
    async fn test_disable_respects_shared_collections() {
        let propagator = Propagator::new(fixture());
        let writes = propagator.set_state("A", ResourceState::UnavailableOffline).await;

        let tree = &propagator.tree;
        let offline = Some("UnavailableOffline".to_string());
        assert_eq!(tree.state("/redfish/v1/Chassis/A"), offline);
        assert_eq!(tree.state("/redfish/v1/Chassis/A/Sensors/Temp"), offline);
        assert_eq!(tree.state("/redfish/v1/Chassis/A/Controls/Fan"), offline);
        assert_eq!(tree.state("/redfish/v1/Chassis/A/Instrumentation/Controls/Pump"), offline);
        assert_eq!(tree.state("/redfish/v1/AutomationNodes/A"), offline);

        let enabled = Some("Enabled".to_string());
        assert_eq!(tree.state("/redfish/v1/Chassis/B"), enabled);
        assert_eq!(tree.state("/redfish/v1/Chassis/B/Sensors/Temp"), enabled);
        assert_eq!(tree.state("/redfish/v1/Chassis/AB/Sensors/Temp"), enabled);
        assert_eq!(writes, 5);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_noop() {
        let propagator = Propagator::new(fixture());
        assert_eq!(propagator.set_state("Z", ResourceState::Enabled).await, 0);
        assert!(propagator.tree.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_enables() {
        let propagator = Propagator::new(fixture());
        propagator.set_state("A", ResourceState::UnavailableOffline).await;

        let endpoint = KnownEndpoint {
            key: "1-1".to_string(),
            device: None,
            resource_id: "A".to_string(),
            resource_path: "/redfish/v1/AutomationNodes/A".to_string(),
            inventory: None,
        };
        propagator.enable(&endpoint).await.unwrap();
        assert_eq!(
            propagator.tree.state("/redfish/v1/Chassis/A/Sensors/Temp"),
            Some("Enabled".to_string())
        );
    }
}
