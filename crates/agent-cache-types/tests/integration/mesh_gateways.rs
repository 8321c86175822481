use std::time::Duration;

use agent_cache::{CacheError, FetchResult, Request};
use agent_cache_types::structs::{
    DatacenterIndexedCheckServiceNodes, DcSpecificRequest, QueryOptions,
};
use agent_cache_types::{FEDERATION_STATE_LIST_MESH_GATEWAYS_NAME as MESH_GATEWAYS, RpcError};
use tokio_util::sync::CancellationToken;

use crate::{gateways, setup_cache};

const METHOD: &str = "FederationState.ListMeshGateways";

fn request(min_index: u64) -> DcSpecificRequest {
    DcSpecificRequest {
        datacenter: "dc1".into(),
        query_options: QueryOptions {
            token: "token".into(),
            min_query_index: min_index,
            max_query_time: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_not_modified_response() {
    let (cache, rpc) = setup_cache();
    rpc.expect_call(
        METHOD,
        |req: &DcSpecificRequest, out: &mut DatacenterIndexedCheckServiceNodes| {
            assert!(req.query_options.allow_stale);
            assert!(req.query_options.allow_not_modified_response);
            out.query_meta.index = 44;
            out.query_meta.not_modified = true;
            Ok(())
        },
    );

    let req = request(44);
    let last = FetchResult::new(gateways("dc1", 42), 42);
    cache
        .prepopulate(MESH_GATEWAYS, last, "dc1", "token", &req.cache_info().key)
        .unwrap();

    let cancel = CancellationToken::new();
    let (value, meta) = cache.get(&cancel, MESH_GATEWAYS, req).await.unwrap();
    cache.close();

    assert_eq!(
        value.downcast_ref::<DatacenterIndexedCheckServiceNodes>(),
        Some(&gateways("dc1", 42))
    );
    assert_eq!(meta.index, 42);
    assert_eq!(meta.outdated, None);
    rpc.assert_expectations();
}

#[tokio::test]
async fn test_prepopulate_precedence() {
    let (cache, rpc) = setup_cache();

    let req = request(24);
    let seeded = FetchResult::new(gateways("dc1", 48), 48);
    cache
        .prepopulate(
            MESH_GATEWAYS,
            seeded.clone(),
            "dc1",
            "token",
            &req.cache_info().key,
        )
        .unwrap();

    let cancel = CancellationToken::new();
    let (value, meta) = cache.get(&cancel, MESH_GATEWAYS, req).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&value, &seeded.value));
    assert_eq!(meta.index, 48);
    assert!(meta.hit);
    assert!(rpc.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_on_rpc_error() {
    let (cache, rpc) = setup_cache();
    rpc.expect_call(
        METHOD,
        |_: &DcSpecificRequest, _: &mut DatacenterIndexedCheckServiceNodes| {
            Err(RpcError::Transport("connection refused".into()))
        },
    );

    let req = request(42);
    cache
        .prepopulate(
            MESH_GATEWAYS,
            FetchResult::new(gateways("dc1", 42), 42),
            "dc1",
            "token",
            &req.cache_info().key,
        )
        .unwrap();

    let cancel = CancellationToken::new();
    let (value, meta) = cache.get(&cancel, MESH_GATEWAYS, req).await.unwrap();
    cache.close();

    assert_eq!(
        value.downcast_ref::<DatacenterIndexedCheckServiceNodes>(),
        Some(&gateways("dc1", 42))
    );
    assert_eq!(meta.index, 42);
    assert_eq!(
        meta.outdated,
        Some(CacheError::Backend(
            "failed to reach server: connection refused".into()
        ))
    );
}

#[tokio::test]
async fn test_cold_rpc_error() {
    let (cache, rpc) = setup_cache();
    rpc.expect_call(
        METHOD,
        |_: &DcSpecificRequest, _: &mut DatacenterIndexedCheckServiceNodes| {
            Err(RpcError::Remote("No path to datacenter".into()))
        },
    );

    let cancel = CancellationToken::new();
    let err = cache
        .get(&cancel, MESH_GATEWAYS, request(0))
        .await
        .unwrap_err();
    cache.close();

    insta::assert_snapshot!(err.to_string(), @"backend error: server error: No path to datacenter");
}
