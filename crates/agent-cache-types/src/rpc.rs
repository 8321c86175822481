use std::any::Any;

use agent_cache::CacheError;
use async_trait::async_trait;
use thiserror::Error;

/// An error returned by an [`Rpc`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No server could be reached.
    #[error("failed to reach server: {0}")]
    Transport(String),
    /// The server failed to handle the request.
    #[error("server error: {0}")]
    Remote(String),
    /// The request or reply passed for a method has the wrong type.
    #[error("invalid arguments for {method}")]
    InvalidArguments { method: String },
}

impl From<RpcError> for CacheError {
    fn from(err: RpcError) -> Self {
        CacheError::backend(&err)
    }
}

/// Performs remote procedure calls against the servers.
///
/// `args` is the typed request of `method`, and `reply` points to a default-initialized reply
/// that the call fills in.
#[async_trait]
pub trait Rpc: Send + Sync + 'static {
    async fn rpc(
        &self,
        method: &str,
        args: &(dyn Any + Send + Sync),
        reply: &mut (dyn Any + Send),
    ) -> Result<(), RpcError>;
}
