use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use caplink_core::{ComponentInstance, Payload, ProviderKind, ResolvedTarget};
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::http::IncomingResponse;

/// What a mediator hands back to the calling component.
#[derive(Debug)]
pub enum Reply {
    Unit,
    Bytes(Vec<u8>),
    Http(IncomingResponse),
}

impl Reply {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Reply::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_http(self) -> Option<IncomingResponse> {
        match self {
            Reply::Http(response) => Some(response),
            _ => None,
        }
    }
}

/// A validated invocation, ready for the mediator serving its target.
pub struct MediatedCall {
    pub target: Arc<ResolvedTarget>,
    pub operation: String,
    pub payload: Payload,
    /// Fires when the calling instance is torn down.
    pub cancel: CancellationToken,
    /// Replica picked when the provider itself runs supervised.
    pub provider_instance: Option<ComponentInstance>,
}

pub type MediatorFuture<'a> = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send + 'a>>;

/// Executes one capability's operations on behalf of calling components.
///
/// The router owns one mediator per [`ProviderKind`]; tests swap in fakes.
pub trait Mediator: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The display name of this mediator (for logging).
    fn name(&self) -> &str;

    fn execute(&self, call: MediatedCall) -> MediatorFuture<'_>;
}
