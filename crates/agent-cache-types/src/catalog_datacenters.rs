use std::sync::Arc;

use agent_cache::{
    CacheError, FetchOptions, FetchResult, Fetcher, RegisterOptions, Request, RequestType,
    downcast_request,
};
use async_trait::async_trait;

use crate::rpc::Rpc;
use crate::structs::DatacentersRequest;

/// The name the [`CatalogDatacenters`] type is registered under.
pub const CATALOG_DATACENTERS_NAME: &str = "catalog-datacenters";

const METHOD: &str = "Catalog.ListDatacenters";

/// Lists the names of all known datacenters.
///
/// Takes a [`DatacentersRequest`], and yields a `Vec<String>`. The servers do not support
/// blocking on this list, so it is only fetched when the cached one is too old.
pub struct CatalogDatacenters {
    rpc: Arc<dyn Rpc>,
}

impl CatalogDatacenters {
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Fetcher for CatalogDatacenters {
    fn request_type(&self) -> RequestType {
        RequestType::of::<DatacentersRequest>()
    }

    fn register_options(&self) -> RegisterOptions {
        RegisterOptions::no_refresh()
    }

    async fn fetch(
        &self,
        _options: FetchOptions,
        request: &dyn Request,
    ) -> Result<FetchResult, CacheError> {
        let mut request = downcast_request::<DatacentersRequest>(request)?.clone();
        request.query_options.allow_stale = true;

        let mut reply: Vec<String> = Vec::new();
        self.rpc.rpc(METHOD, &request, &mut reply).await?;

        // the list carries no index of its own
        Ok(FetchResult::new(reply, 1))
    }
}
