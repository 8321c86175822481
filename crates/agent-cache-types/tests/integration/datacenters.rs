use agent_cache::test::TestRequest;
use agent_cache_types::CATALOG_DATACENTERS_NAME as DATACENTERS;
use agent_cache_types::structs::DatacentersRequest;
use tokio_util::sync::CancellationToken;

use crate::setup_cache;

const METHOD: &str = "Catalog.ListDatacenters";

#[tokio::test]
async fn test_single_flight() {
    let (cache, rpc) = setup_cache();
    rpc.expect_call(METHOD, |_: &DatacentersRequest, out: &mut Vec<String>| {
        *out = vec!["dc1".into(), "dc2".into()];
        Ok(())
    });

    let cancel = CancellationToken::new();
    let requests =
        (0..10).map(|_| cache.get(&cancel, DATACENTERS, DatacentersRequest::default()));
    let results = futures::future::join_all(requests).await;

    assert_eq!(rpc.calls().len(), 1);
    for result in results {
        let (value, meta) = result.unwrap();
        assert_eq!(value.downcast_ref::<Vec<String>>().unwrap(), &["dc1", "dc2"]);
        assert_eq!(meta.index, 1);
    }
}

#[tokio::test]
async fn test_wrong_request_type() {
    let (cache, rpc) = setup_cache();

    let cancel = CancellationToken::new();
    let err = cache
        .get(&cancel, DATACENTERS, TestRequest::new("dcs"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("wrong type"));
    assert!(rpc.calls().is_empty());
}
