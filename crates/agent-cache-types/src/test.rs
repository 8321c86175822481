//! Test doubles for the RPC boundary.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::rpc::{Rpc, RpcError};

type Handler = Box<
    dyn Fn(&(dyn Any + Send + Sync), &mut (dyn Any + Send)) -> Result<(), RpcError> + Send + Sync,
>;

/// An [`Rpc`] that answers calls with handlers registered per method.
///
/// Calls to methods without a handler fail with [`RpcError::Remote`].
#[derive(Default)]
pub struct MockRpc {
    handlers: Mutex<BTreeMap<String, Handler>>,
    calls: Mutex<Vec<String>>,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Answers every call of `method` with `handler`.
    ///
    /// The handler receives the typed request, and fills in the typed reply.
    pub fn expect_call<Req, Reply, F>(&self, method: &str, handler: F)
    where
        Req: Any,
        Reply: Any,
        F: Fn(&Req, &mut Reply) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        let method_name = method.to_owned();
        let handler: Handler = Box::new(
            move |args: &(dyn Any + Send + Sync), reply: &mut (dyn Any + Send)| {
                let invalid = || RpcError::InvalidArguments {
                    method: method_name.clone(),
                };
                let args = args.downcast_ref::<Req>().ok_or_else(invalid)?;
                let reply = reply.downcast_mut::<Reply>().ok_or_else(invalid)?;
                handler(args, reply)
            },
        );
        self.handlers.lock().insert(method.to_owned(), handler);
    }

    /// The methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Asserts that every expected method was called at least once.
    pub fn assert_expectations(&self) {
        let calls = self.calls.lock();
        for method in self.handlers.lock().keys() {
            assert!(
                calls.contains(method),
                "expected a call to {method}, got {calls:?}"
            );
        }
    }
}

#[async_trait]
impl Rpc for MockRpc {
    async fn rpc(
        &self,
        method: &str,
        args: &(dyn Any + Send + Sync),
        reply: &mut (dyn Any + Send),
    ) -> Result<(), RpcError> {
        self.calls.lock().push(method.to_owned());
        match self.handlers.lock().get(method) {
            Some(handler) => handler(args, reply),
            None => Err(RpcError::Remote(format!("unexpected call to {method}"))),
        }
    }
}
