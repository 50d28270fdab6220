use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{RequestHandler, Transport, TransportError};
use crate::common::PeerAddr;
use crate::wire::{Request, Response};

/// Loopback network connecting handlers within one process.
///
/// Doubles as the `Transport` of every node registered on it. Nodes can be
/// taken down and brought back to exercise partition behavior in tests; a
/// downed node is indistinguishable from an unreachable one.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<RwLock<HashMap<PeerAddr, Endpoint>>>,
}

#[derive(Clone)]
struct Endpoint {
    handler: Arc<dyn RequestHandler>,
    up: bool,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: PeerAddr, handler: Arc<dyn RequestHandler>) {
        let mut endpoints = self.endpoints.write().unwrap();
        endpoints.insert(addr, Endpoint { handler, up: true });
    }

    pub fn deregister(&self, addr: &PeerAddr) {
        self.endpoints.write().unwrap().remove(addr);
    }

    pub fn set_down(&self, addr: &PeerAddr, down: bool) {
        if let Some(endpoint) = self.endpoints.write().unwrap().get_mut(addr) {
            endpoint.up = !down;
        }
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn send(
        &self,
        target: &PeerAddr,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        // Clone the endpoint out so the lock is not held across the call.
        let endpoint = {
            let endpoints = self.endpoints.read().unwrap();
            match endpoints.get(target) {
                Some(endpoint) if endpoint.up => endpoint.clone(),
                _ => return Err(TransportError::Unreachable(target.clone())),
            }
        };

        match tokio::time::timeout(timeout, endpoint.handler.handle(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("in-memory request to {target} timed out");
                Err(TransportError::Timeout(target.clone()))
            }
        }
    }
}
