use std::collections::BTreeMap;
use std::sync::Arc;

use agent_cache::Cache;
use agent_cache::config::CacheConfig;
use agent_cache_types::register_types;
use agent_cache_types::structs::{
    CheckServiceNode, DatacenterIndexedCheckServiceNodes, Node, QueryMeta,
};
use agent_cache_types::test::MockRpc;

/// Creates a cache with all types registered, fetching through a fresh [`MockRpc`].
pub fn setup_cache() -> (Cache, Arc<MockRpc>) {
    agent_cache::test::setup();
    let rpc = MockRpc::new();
    let cache = Cache::new(CacheConfig::default());
    register_types(&cache, rpc.clone());
    (cache, rpc)
}

/// A mesh gateway reply for `datacenter` with a single gateway node.
pub fn gateways(datacenter: &str, index: u64) -> DatacenterIndexedCheckServiceNodes {
    let node = CheckServiceNode {
        node: Some(Node {
            id: "664bac9f-4de7-4f1b-ad35-0e5365e8f329".into(),
            node: "gateway1".into(),
            datacenter: datacenter.into(),
            address: "1.2.3.4".into(),
            ..Default::default()
        }),
        ..Default::default()
    };

    DatacenterIndexedCheckServiceNodes {
        datacenter_nodes: BTreeMap::from([(datacenter.to_owned(), vec![node])]),
        query_meta: QueryMeta {
            index,
            ..Default::default()
        },
    }
}
