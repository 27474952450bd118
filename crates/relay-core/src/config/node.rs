//! Node identity configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::id::NodeId;

/// Identity of this relay process within the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable node id. Generated at startup when absent.
    #[serde(default)]
    pub id: Option<String>,
}

impl NodeConfig {
    /// Resolve the configured id, or generate `node-<8 hex>`.
    pub fn resolve_id(&self) -> NodeId {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => NodeId::new(id),
            _ => {
                let suffix = Uuid::new_v4().simple().to_string();
                NodeId::new(format!("node-{}", &suffix[..8]))
            }
        }
    }
}
