pub mod memory;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::{PartitionId, PeerAddr};
use crate::wire::codec::CodecError;
use crate::wire::{Request, Response};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {0} timed out")]
    Timeout(PeerAddr),

    #[error("peer {0} is unreachable")]
    Unreachable(PeerAddr),

    #[error("no handler registered for partition {0}")]
    UnknownPartition(PartitionId),

    #[error("handler is shut down")]
    HandlerClosed,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound capability injected into the consensus engine: fire a request at
/// a peer and await its reply within the given timeout. Implementations must
/// be cheap to call concurrently from many spawned tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        target: &PeerAddr,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, TransportError>;
}

/// Inbound dispatch seam. The consensus engine handles requests for its own
/// partition; the engine registry routes across partitions; servers feed
/// decoded requests into whichever of the two they were built with.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response, TransportError>;
}
