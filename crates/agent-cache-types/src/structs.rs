//! The request and reply types exchanged with the servers.

use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use agent_cache::{Request, RequestInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The service meta key that marks mesh gateways used for WAN federation.
pub const META_WAN_FEDERATION_KEY: &str = "consul-wan-federation";

/// The status of a passing health check.
pub const HEALTH_PASSING: &str = "passing";

/// Options common to all blocking read requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct QueryOptions {
    /// The ACL token the request is made with.
    pub token: String,
    /// Block until the data has an index higher than this.
    pub min_query_index: u64,
    /// The maximum time the server may block.
    #[serde(with = "humantime_serde")]
    pub max_query_time: Duration,
    /// Allow any server to answer, not just the leader.
    pub allow_stale: bool,
    /// Allow the server to answer with "not modified" instead of the full reply.
    pub allow_not_modified_response: bool,
    /// Cached answers older than this are not accepted.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Always fetch, and fail instead of returning cached answers.
    pub must_revalidate: bool,
    /// A filter expression applied to the results.
    pub filter: String,
}

/// Metadata returned with every reply to a read request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct QueryMeta {
    /// The index of the returned data.
    pub index: u64,
    /// Set when the reply omits its data because it did not change.
    pub not_modified: bool,
    /// Whether the answering server knows the current leader.
    pub known_leader: bool,
    /// The time since the answering server was last in contact with the leader.
    #[serde(with = "humantime_serde")]
    pub last_contact: Duration,
}

/// A request scoped to a single datacenter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DcSpecificRequest {
    pub datacenter: String,
    pub node_meta_filters: BTreeMap<String, String>,
    #[serde(flatten)]
    pub query_options: QueryOptions,
}

/// The parts of a [`DcSpecificRequest`] that tell two requests apart within a datacenter.
#[derive(Serialize)]
struct DcSpecificKey<'a> {
    node_meta_filters: &'a BTreeMap<String, String>,
    filter: &'a str,
}

impl DcSpecificRequest {
    fn cache_key(&self) -> String {
        let key = DcSpecificKey {
            node_meta_filters: &self.node_meta_filters,
            filter: &self.query_options.filter,
        };
        match serde_json::to_vec(&key) {
            Ok(json) => hex::encode(Sha256::digest(json)),
            Err(err) => {
                // an empty key makes the request bypass the cache
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "Failed to compute cache key"
                );
                String::new()
            }
        }
    }
}

impl Request for DcSpecificRequest {
    fn cache_info(&self) -> RequestInfo {
        RequestInfo {
            key: self.cache_key(),
            token: self.query_options.token.clone(),
            datacenter: self.datacenter.clone(),
            min_index: self.query_options.min_query_index,
            timeout: self.query_options.max_query_time,
            max_age: self.query_options.max_age,
            must_revalidate: self.query_options.must_revalidate,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A request for the list of known datacenters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DatacentersRequest {
    #[serde(flatten)]
    pub query_options: QueryOptions,
}

impl Request for DatacentersRequest {
    fn cache_info(&self) -> RequestInfo {
        RequestInfo {
            // the list is the same for every datacenter and token
            key: "catalog-datacenters".into(),
            max_age: self.query_options.max_age,
            must_revalidate: self.query_options.must_revalidate,
            ..Default::default()
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: String,
    pub node: String,
    pub datacenter: String,
    pub address: String,
    pub meta: BTreeMap<String, String>,
}

/// The kind of a service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    /// A regular service.
    #[default]
    #[serde(rename = "")]
    Typical,
    ConnectProxy,
    MeshGateway,
    TerminatingGateway,
    IngressGateway,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    pub kind: ServiceKind,
    pub address: String,
    pub port: u16,
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HealthCheck {
    pub node: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
}

/// A service instance together with its node and health checks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CheckServiceNode {
    pub node: Option<Node>,
    pub service: Option<NodeService>,
    pub checks: Vec<HealthCheck>,
}

impl CheckServiceNode {
    /// Whether all health checks of this instance are passing.
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|check| check.status == HEALTH_PASSING)
    }
}

/// Service instances grouped by datacenter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DatacenterIndexedCheckServiceNodes {
    pub datacenter_nodes: BTreeMap<String, Vec<CheckServiceNode>>,
    #[serde(flatten)]
    pub query_meta: QueryMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_specific_cache_info() {
        let request = DcSpecificRequest {
            datacenter: "dc1".into(),
            query_options: QueryOptions {
                token: "token".into(),
                min_query_index: 44,
                max_query_time: Duration::from_secs(1),
                ..Default::default()
            },
            ..Default::default()
        };

        let info = request.cache_info();
        assert_eq!(info.datacenter, "dc1");
        assert_eq!(info.token, "token");
        assert_eq!(info.min_index, 44);
        assert_eq!(info.timeout, Duration::from_secs(1));
        assert_eq!(info.key.len(), 64);

        // blocking options do not change the key
        let mut later = request.clone();
        later.query_options.min_query_index = 100;
        assert_eq!(later.cache_info().key, info.key);

        let mut filtered = request.clone();
        filtered.query_options.filter = "Service.Meta.version == 2".into();
        assert_ne!(filtered.cache_info().key, info.key);

        let mut filtered = request;
        filtered
            .node_meta_filters
            .insert("rack".into(), "r1".into());
        assert_ne!(filtered.cache_info().key, info.key);
    }

    #[test]
    fn test_datacenters_cache_info() {
        let request = DatacentersRequest {
            query_options: QueryOptions {
                token: "secret".into(),
                max_age: Duration::from_secs(30),
                ..Default::default()
            },
        };

        let info = request.cache_info();
        assert_eq!(info.key, "catalog-datacenters");
        assert_eq!(info.token, "");
        assert_eq!(info.max_age, Duration::from_secs(30));
    }

    #[test]
    fn test_reply_wire_format() {
        let json = r#"{
            "DatacenterNodes": {
                "dc9": [{
                    "Node": {"ID": "664bac9f", "Node": "gateway1", "Datacenter": "dc9", "Address": "1.2.3.4"},
                    "Service": {"ID": "mesh-gateway", "Service": "mesh-gateway", "Kind": "mesh-gateway", "Port": 1111},
                    "Checks": [{"Name": "web connectivity", "Status": "passing", "ServiceID": "mesh-gateway"}]
                }]
            },
            "Index": 48,
            "KnownLeader": true,
            "LastContact": "15ms"
        }"#;

        let reply: DatacenterIndexedCheckServiceNodes = serde_json::from_str(json).unwrap();
        assert_eq!(reply.query_meta.index, 48);
        assert!(reply.query_meta.known_leader);
        assert_eq!(reply.query_meta.last_contact, Duration::from_millis(15));

        let gateway = &reply.datacenter_nodes["dc9"][0];
        let service = gateway.service.as_ref().unwrap();
        assert_eq!(service.kind, ServiceKind::MeshGateway);
        assert_eq!(service.port, 1111);
        assert!(gateway.is_healthy());
    }
}
