//! The cache types of the agent, and the RPC boundary they fetch through.
//!
//! Every cache type is a [`Fetcher`](agent_cache::Fetcher) that wraps exactly one RPC method.
//! [`register_types`] registers all of them with a [`Cache`].

use std::sync::Arc;

use agent_cache::Cache;

pub mod catalog_datacenters;
pub mod federation_state;
pub mod rpc;
pub mod structs;

#[cfg(any(feature = "test", test))]
pub mod test;

pub use catalog_datacenters::{CATALOG_DATACENTERS_NAME, CatalogDatacenters};
pub use federation_state::{
    FEDERATION_STATE_LIST_MESH_GATEWAYS_NAME, FederationStateListMeshGateways,
};
pub use rpc::{Rpc, RpcError};

/// Registers all cache types with `cache`, fetching through `rpc`.
pub fn register_types(cache: &Cache, rpc: Arc<dyn Rpc>) {
    cache.register_type(
        FEDERATION_STATE_LIST_MESH_GATEWAYS_NAME,
        Arc::new(FederationStateListMeshGateways::new(Arc::clone(&rpc))),
    );
    cache.register_type(
        CATALOG_DATACENTERS_NAME,
        Arc::new(CatalogDatacenters::new(rpc)),
    );
    tracing::debug!("Registered cache types");
}
