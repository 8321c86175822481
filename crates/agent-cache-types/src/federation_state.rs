use std::sync::Arc;

use agent_cache::{
    CacheError, FetchOptions, FetchResult, Fetcher, RegisterOptions, Request, RequestType,
    downcast_request,
};
use async_trait::async_trait;

use crate::rpc::Rpc;
use crate::structs::{DatacenterIndexedCheckServiceNodes, DcSpecificRequest};

/// The name the [`FederationStateListMeshGateways`] type is registered under.
pub const FEDERATION_STATE_LIST_MESH_GATEWAYS_NAME: &str = "federation-state-list-mesh-gateways";

const METHOD: &str = "FederationState.ListMeshGateways";

/// Lists the mesh gateways of all datacenters, as seen by the federation states.
///
/// Takes a [`DcSpecificRequest`], and yields a [`DatacenterIndexedCheckServiceNodes`].
pub struct FederationStateListMeshGateways {
    rpc: Arc<dyn Rpc>,
}

impl FederationStateListMeshGateways {
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Fetcher for FederationStateListMeshGateways {
    fn request_type(&self) -> RequestType {
        RequestType::of::<DcSpecificRequest>()
    }

    fn register_options(&self) -> RegisterOptions {
        RegisterOptions::blocking_refresh()
    }

    async fn fetch(
        &self,
        options: FetchOptions,
        request: &dyn Request,
    ) -> Result<FetchResult, CacheError> {
        let mut request = downcast_request::<DcSpecificRequest>(request)?.clone();

        let query = &mut request.query_options;
        query.min_query_index = options.min_index;
        query.max_query_time = options.timeout;
        // the answer ends up in the cache anyway, so any server may give it
        query.allow_stale = true;
        query.allow_not_modified_response = options.last_result.is_some();

        let mut reply = DatacenterIndexedCheckServiceNodes::default();
        self.rpc.rpc(METHOD, &request, &mut reply).await?;

        let index = reply.query_meta.index;
        if reply.query_meta.not_modified {
            if let Some(last) = &options.last_result {
                return Ok(FetchResult::not_modified(last, index));
            }
        }
        Ok(FetchResult::new(reply, index))
    }
}
